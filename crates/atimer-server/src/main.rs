mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{any, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use atimer_db::Database;
use atimer_gateway::connection;
use atimer_gateway::push::{self, PushRouteState};
use atimer_gateway::{Dispatcher, GatewayPusher};
use atimer_relay::webhook::{self, Relay};
use atimer_relay::TrelloClient;

use crate::config::ServerConfig;

type AppRelay = Relay<Arc<Database>, GatewayPusher, TrelloClient>;

#[derive(Clone)]
struct RealtimeState {
    dispatcher: Dispatcher,
    db: Arc<Database>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atimer=debug,atimer_relay=debug,atimer_gateway=debug,tower_http=debug".into()),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Registry. Sockets never survive a restart, so rows this node owned are stale.
    let db = Arc::new(Database::open(&config.db_path)?);
    let pruned = db.delete_connections_for_endpoint(&config.endpoint)?;
    if pruned > 0 {
        info!("Pruned {} stale connections for {:?}", pruned, config.endpoint);
    }

    let dispatcher = Dispatcher::new(config.endpoint.clone());
    let pusher = GatewayPusher::new(
        dispatcher.clone(),
        config.push_url_template.clone(),
        config.push_key.clone(),
    );
    let boards = TrelloClient::new(config.trello_api_url.clone(), config.powerup_id.clone());
    let relay: Arc<AppRelay> = Arc::new(Relay::new(
        db.clone(),
        pusher,
        boards,
        config.trello_secret.clone(),
        config.public_url.clone(),
    ));

    // Routes
    let webhook_routes = Router::new()
        .route(
            "/webhook",
            any(webhook::receive::<Arc<Database>, GatewayPusher, TrelloClient>),
        )
        .with_state(relay);

    let realtime_routes = Router::new()
        .route("/realtime", get(ws_upgrade))
        .with_state(RealtimeState {
            dispatcher: dispatcher.clone(),
            db,
        });

    let push_routes = Router::new()
        .route("/connections/{connection_id}", post(push::receive_push))
        .with_state(PushRouteState {
            dispatcher,
            push_key: config.push_key.clone(),
        });

    let app = Router::new()
        .merge(webhook_routes)
        .merge(realtime_routes)
        .merge(push_routes)
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Activity timer relay listening on {}", config.addr);
    info!("Webhook callback base: {}", config.public_url);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<RealtimeState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.db))
}

async fn health() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}), waiting for Ctrl+C", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
