//! Headless listener: holds the realtime channel open for one member and
//! logs every "start timer" request the gateway pushes.

use std::time::Duration;

use tracing::info;

use atimer_client::{EngineConfig, EngineHandle, TungsteniteTransport};
use atimer_types::api::AutoTimerSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atimer_client=debug,atimer_listen=debug".into()),
        )
        .init();

    // Config
    let url = std::env::var("ATIMER_REALTIME_URL")
        .unwrap_or_else(|_| "ws://localhost:3000/realtime".into());
    let member_id = std::env::var("ATIMER_MEMBER_ID")
        .map_err(|_| anyhow::anyhow!("ATIMER_MEMBER_ID must be set"))?;
    let settings = AutoTimerSettings {
        enabled: std::env::var("ATIMER_AUTO_TIMER")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(true),
        trigger_list_id: std::env::var("ATIMER_TRIGGER_LIST_ID").ok(),
    };

    let engine = EngineHandle::spawn(EngineConfig::new(url.clone(), member_id.clone()), TungsteniteTransport);
    engine.on_state_change(|state| info!("realtime channel {:?}", state));

    let poller = engine.poll_timer_starts(Duration::from_secs(1), |card_id| {
        info!("start timer on card {}", card_id);
    });

    if !engine.initialize(&settings) {
        info!("auto timer is off for member {}, nothing to listen for", member_id);
        engine.shutdown();
        poller.abort();
        return Ok(());
    }
    info!("listening on {} as member {}", url, member_id);

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    engine.disconnect();
    engine.shutdown();
    let _ = poller.await;

    Ok(())
}
