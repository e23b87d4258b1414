use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use klipper_overlay_daemon::api::{start_api_server, ApiState};
use klipper_overlay_daemon::broadcast::Broadcaster;
use klipper_overlay_daemon::config::AppConfig;
use klipper_overlay_daemon::history::SessionHistory;
use klipper_overlay_daemon::metadata::{MetadataCache, METADATA_TTL};
use klipper_overlay_daemon::moonraker::{MoonrakerClient, StatusAcquirer};
use klipper_overlay_daemon::realtime::RealtimeSupervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();
    info!(
        "Klipper Overlay Daemon v{} (Moonraker at {})",
        env!("CARGO_PKG_VERSION"),
        config.moonraker_url
    );

    let moonraker = Arc::new(MoonrakerClient::new(&config.moonraker_url));
    let metadata = Arc::new(MetadataCache::new(&config.moonraker_url, METADATA_TTL));
    let acquirer = Arc::new(StatusAcquirer::new(moonraker.clone(), metadata));
    let history = Arc::new(Mutex::new(SessionHistory::new()));

    let broadcaster = Arc::new(Broadcaster::new(acquirer.clone(), history.clone()));
    let broadcast_task = broadcaster
        .clone()
        .spawn(Duration::from_millis(config.refresh_interval_ms));

    let realtime = RealtimeSupervisor::spawn(config.moonraker_ws_url());

    let state = ApiState {
        acquirer,
        broadcaster,
        moonraker,
        history,
        start_time: Instant::now(),
    };

    let result = start_api_server(&config.bind_addr(), state, config.cors_enabled).await;

    // Deterministic teardown of the background tasks, including any
    // reconnect delay the supervisor still has pending.
    broadcast_task.abort();
    realtime.shutdown();
    info!("Shutdown complete");

    result.map_err(|e| anyhow::anyhow!(e.to_string()))
}
