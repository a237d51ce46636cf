use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::http::StatusCode;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use atimer_db::ConnectionRegistry;
use atimer_types::events::{ControlReply, SubscribeCommand};
use atimer_types::models::{ConnectionRecord, EndpointCoords};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Why a control message was refused.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload has no listen_member_id")]
    MissingMemberId,

    #[error("registry write failed: {0:#}")]
    Registry(anyhow::Error),
}

impl ControlError {
    pub fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Socket opened. Subscription waits for the first data message.
pub fn on_connect(connection_id: &str) -> StatusCode {
    debug!("connection {} opened", connection_id);
    StatusCode::OK
}

/// Socket closed. Registry cleanup is best-effort.
pub fn on_disconnect<R: ConnectionRegistry>(registry: &R, connection_id: &str) -> StatusCode {
    if let Err(e) = registry.delete_by_connection_id(connection_id) {
        warn!("failed to remove connection {} from registry: {:#}", connection_id, e);
    }
    StatusCode::OK
}

/// Subscribe message: `{"listen_member_id": "..."}`.
pub fn on_message<R: ConnectionRegistry>(
    registry: &R,
    connection_id: &str,
    endpoint: &EndpointCoords,
    payload: &str,
) -> Result<StatusCode, ControlError> {
    let command: SubscribeCommand = serde_json::from_str(payload)?;
    let member_id = command
        .listen_member_id
        .filter(|id| !id.is_empty())
        .ok_or(ControlError::MissingMemberId)?;

    let record = ConnectionRecord {
        connection_id: connection_id.to_string(),
        member_id,
        endpoint: endpoint.clone(),
    };
    registry.put(&record).map_err(ControlError::Registry)?;

    info!("connection {} listening for member {}", connection_id, record.member_id);
    Ok(StatusCode::OK)
}

/// Run `on_message` on the blocking pool and turn the result into the frame
/// sent back to the client.
pub async fn handle_control<R>(
    registry: R,
    connection_id: String,
    endpoint: EndpointCoords,
    payload: String,
) -> ControlReply
where
    R: ConnectionRegistry + 'static,
{
    let preview: String = payload.chars().take(200).collect();
    let conn_id = connection_id.clone();
    let result = tokio::task::spawn_blocking(move || {
        on_message(&registry, &connection_id, &endpoint, &payload)
    })
    .await;

    match result {
        Ok(Ok(status)) => ControlReply {
            status: status.as_u16(),
            error: None,
        },
        Ok(Err(e)) => {
            warn!(
                "connection {} control message rejected ({}): {} -- raw: {}",
                conn_id,
                e.status().as_u16(),
                e,
                preview
            );
            ControlReply::failed(e.status().as_u16(), e.to_string())
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            ControlReply::failed(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), "internal error")
        }
    }
}

/// Drive one realtime socket until either side goes away.
pub async fn handle_connection<R>(socket: WebSocket, dispatcher: Dispatcher, registry: R)
where
    R: ConnectionRegistry + Clone + 'static,
{
    let (connection_id, mut push_rx) = dispatcher.register().await;
    on_connect(&connection_id);

    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ControlReply>();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward pushed events and control replies to the client, with heartbeat
    let send_conn_id = connection_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            let text = tokio::select! {
                event = push_rx.recv() => {
                    let Some(event) = event else { break };
                    serde_json::to_string(&event)
                }
                Some(reply) = reply_rx.recv() => serde_json::to_string(&reply),
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("connection {} heartbeat timeout (missed {} pongs)", send_conn_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let text = match text {
                Ok(text) => text,
                Err(e) => {
                    warn!("connection {} dropped unserializable frame: {}", send_conn_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Read control messages from the client
    let recv_conn_id = connection_id.clone();
    let recv_registry = registry.clone();
    let endpoint = dispatcher.endpoint().clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = handle_control(
                        recv_registry.clone(),
                        recv_conn_id.clone(),
                        endpoint.clone(),
                        text.as_str().to_owned(),
                    )
                    .await;
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(&connection_id).await;
    let closed_id = connection_id.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || on_disconnect(&registry, &closed_id)).await {
        error!("spawn_blocking join error: {}", e);
    }
    info!("connection {} closed", connection_id);
}
