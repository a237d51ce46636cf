use std::future::Future;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

use atimer_types::events::PushEvent;
use atimer_types::models::{ConnectionRecord, EndpointCoords};

use crate::dispatcher::Dispatcher;

#[derive(Debug, Error)]
pub enum PushError {
    /// The connection no longer exists; its registry entry is stale.
    #[error("connection {0} is gone")]
    Gone(String),

    #[error("push transport failed: {0}")]
    Transport(String),
}

/// Delivers an event to the socket behind a registry record.
pub trait Pusher: Send + Sync {
    fn push(
        &self,
        record: &ConnectionRecord,
        event: &PushEvent,
    ) -> impl Future<Output = Result<(), PushError>> + Send;
}

/// Pushes locally when the record belongs to this node, otherwise forwards
/// to the owning node's `/connections/{id}` route.
#[derive(Clone)]
pub struct GatewayPusher {
    dispatcher: Dispatcher,
    http: reqwest::Client,
    url_template: String,
    push_key: Option<String>,
}

impl GatewayPusher {
    pub fn new(dispatcher: Dispatcher, url_template: String, push_key: Option<String>) -> Self {
        Self {
            dispatcher,
            http: reqwest::Client::new(),
            url_template,
            push_key,
        }
    }

    /// Base URL of the node identified by `endpoint`.
    pub fn node_url(&self, endpoint: &EndpointCoords) -> String {
        self.url_template
            .replace("{region}", &endpoint.region)
            .replace("{api_id}", &endpoint.api_id)
            .replace("{stage}", &endpoint.stage)
            .trim_end_matches('/')
            .to_string()
    }

    async fn push_remote(&self, record: &ConnectionRecord, event: &PushEvent) -> Result<(), PushError> {
        let url = format!(
            "{}/connections/{}",
            self.node_url(&record.endpoint),
            record.connection_id
        );
        debug!("forwarding push for {} to {}", record.connection_id, url);

        let mut request = self.http.post(&url).json(event);
        if let Some(key) = &self.push_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::GONE => Err(PushError::Gone(record.connection_id.clone())),
            status => Err(PushError::Transport(format!("{} answered {}", url, status))),
        }
    }
}

impl Pusher for GatewayPusher {
    async fn push(&self, record: &ConnectionRecord, event: &PushEvent) -> Result<(), PushError> {
        if &record.endpoint == self.dispatcher.endpoint() {
            self.dispatcher
                .push_local(&record.connection_id, event.clone())
                .await
        } else {
            self.push_remote(record, event).await
        }
    }
}

/// State for the node-to-node push route.
#[derive(Clone)]
pub struct PushRouteState {
    pub dispatcher: Dispatcher,
    pub push_key: Option<String>,
}

/// `POST /connections/{connection_id}`: deliver to a socket held by this node.
pub async fn receive_push(
    State(state): State<PushRouteState>,
    Path(connection_id): Path<String>,
    headers: HeaderMap,
    Json(event): Json<PushEvent>,
) -> StatusCode {
    if let Some(key) = &state.push_key {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if !presented.is_some_and(|p| keys_match(p, key)) {
            warn!("rejected node push for {} with bad key", connection_id);
            return StatusCode::UNAUTHORIZED;
        }
    }

    match state.dispatcher.push_local(&connection_id, event).await {
        Ok(()) => StatusCode::OK,
        Err(PushError::Gone(_)) => StatusCode::GONE,
        Err(e) => {
            warn!("node push for {} failed: {}", connection_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn keys_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
