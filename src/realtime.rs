use crate::errors::{DaemonError, Result};
use backon::{ConstantBuilder, Retryable};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

/// Fixed delay between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Channel state for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// Keeps a live subscription to Moonraker's realtime feed warm.
///
/// Advisory only: incoming updates are parsed and discarded, and HTTP
/// polling remains authoritative. The supervisor cycles Disconnected,
/// Connecting and Subscribed forever, reconnecting after a fixed delay
/// whenever the channel drops. It is never fatal to the rest of the daemon.
pub struct RealtimeSupervisor {
    state: Arc<RwLock<ChannelState>>,
    handle: JoinHandle<()>,
}

impl RealtimeSupervisor {
    /// Spawn the supervisor's background task. The returned handle owns
    /// the connection loop, including any pending reconnect delay.
    pub fn spawn(ws_url: String) -> Self {
        let state = Arc::new(RwLock::new(ChannelState::Disconnected));
        let task_state = state.clone();

        let handle = tokio::spawn(async move {
            let session = || Self::run_session(&ws_url, &task_state);

            // Fixed 5s delay, unbounded retries. Sessions only ever end
            // in an error, so this loops for the life of the daemon.
            let backoff = ConstantBuilder::default()
                .with_delay(RECONNECT_DELAY)
                .with_max_times(usize::MAX);

            if let Err(e) = session.retry(backoff).await {
                warn!("Realtime channel retries exhausted: {}", e);
            }
        });

        Self { state, handle }
    }

    pub async fn channel_state(&self) -> ChannelState {
        self.state.read().await.clone()
    }

    /// Deterministic teardown: aborts the connection loop and whatever
    /// reconnect delay is pending.
    pub fn shutdown(self) {
        self.handle.abort();
        info!("Realtime supervisor stopped");
    }

    async fn run_session(ws_url: &str, state: &Arc<RwLock<ChannelState>>) -> Result<()> {
        let result = Self::session(ws_url, state).await;
        *state.write().await = ChannelState::Disconnected;
        result
    }

    /// One connection lifetime: open, subscribe, drain messages until the
    /// channel drops. Always returns Err so the retry loop reconnects.
    async fn session(ws_url: &str, state: &Arc<RwLock<ChannelState>>) -> Result<()> {
        *state.write().await = ChannelState::Connecting;
        debug!("Connecting realtime channel: {}", ws_url);

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| DaemonError::Realtime(format!("WebSocket connection failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();

        // Fire-and-forget: no acknowledgement is required for the
        // subscription to be considered active.
        let subscribe = json!({
            "jsonrpc": "2.0",
            "method": "printer.objects.subscribe",
            "params": {
                "objects": {
                    "heater_bed": null,
                    "extruder": null,
                    "print_stats": null,
                    "display_status": null,
                    "virtual_sdcard": null,
                },
            },
            "id": 1,
        });

        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| DaemonError::Realtime(format!("Failed to send subscription: {}", e)))?;

        *state.write().await = ChannelState::Subscribed;
        info!("Subscribed to Moonraker realtime updates");

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<serde_json::Value>(&text) {
                    // Updates are observed but not folded into the
                    // acquired status; polling stays authoritative.
                    Ok(update) => {
                        if let Some(method) = update.get("method").and_then(|m| m.as_str()) {
                            debug!("Realtime update: {}", method);
                        }
                    }
                    Err(e) => debug!("Discarding malformed realtime message: {}", e),
                },
                Ok(Message::Close(_)) => {
                    warn!("Realtime channel closed by Moonraker");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Realtime channel error: {}", e);
                    break;
                }
            }
        }

        Err(DaemonError::Realtime(format!(
            "channel dropped, reconnecting in {}s",
            RECONNECT_DELAY.as_secs()
        )))
    }
}
