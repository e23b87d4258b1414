use crate::errors::{DaemonError, Result};
use crate::metadata::MetadataCache;
use crate::status::{estimate_remaining, PrinterState, PrinterStatus};
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw telemetry objects returned by `/printer/objects/query`, reduced to
/// the fields we consume. Everything is optional; Klipper omits objects
/// it has not initialized yet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectStatus {
    pub heater_bed: Option<Heater>,
    pub extruder: Option<Heater>,
    pub print_stats: Option<PrintStats>,
    pub display_status: Option<DisplayStatus>,
    pub virtual_sdcard: Option<VirtualSdcard>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Heater {
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub target: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrintStats {
    pub state: Option<String>,
    pub filename: Option<String>,
    pub print_duration: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisplayStatus {
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VirtualSdcard {
    pub progress: Option<f64>,
    pub file_position: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    status: ObjectStatus,
}

/// Thin client over Moonraker's HTTP API.
pub struct MoonrakerClient {
    client: Client,
    base_url: String,
}

impl MoonrakerClient {
    pub fn new(moonraker_url: &str) -> Self {
        let client = Client::builder()
            .timeout(STATUS_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to create HTTP client with custom config: {}. Using defaults.", e);
                Client::new()
            });

        let base_url = moonraker_url.trim_end_matches('/').to_string();

        info!("Initialized Moonraker client: {}", base_url);

        Self { client, base_url }
    }

    /// Query the telemetry objects of interest in one round trip.
    pub async fn query_objects(&self) -> Result<ObjectStatus> {
        let url = format!("{}/printer/objects/query", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("heater_bed", ""),
                ("extruder", ""),
                ("print_stats", ""),
                ("display_status", ""),
                ("virtual_sdcard", ""),
            ])
            .send()
            .await
            .map_err(|e| DaemonError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DaemonError::Upstream(format!(
                "status query returned {}",
                response.status()
            )));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| DaemonError::Network(format!("Parse error: {}", e)))?;

        Ok(body.result.status)
    }

    /// Fetch a file from Moonraker's gcode store, for the thumbnail proxy.
    /// Each path segment is percent-encoded on the way out.
    pub async fn fetch_gcode_file(&self, path: &str) -> Result<reqwest::Response> {
        let mut url = Url::parse(&format!("{}/server/files/gcodes", self.base_url))
            .map_err(|e| DaemonError::Config(format!("Invalid Moonraker URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| DaemonError::Config("Moonraker URL cannot be a base".to_string()))?
            .extend(path.split('/'));

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DaemonError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DaemonError::Upstream(format!(
                "file fetch returned {}",
                response.status()
            )));
        }

        Ok(response)
    }
}

/// Performs one full status acquisition: telemetry query, state
/// normalization, metadata/thumbnail lookup and ETA derivation, folded
/// into a single snapshot.
///
/// `fetch()` never fails: any transport problem collapses into the
/// disconnected sentinel so displays degrade to "can't reach printer"
/// instead of an error channel.
pub struct StatusAcquirer {
    client: Arc<MoonrakerClient>,
    metadata: Arc<MetadataCache>,
    last_status: RwLock<Option<PrinterStatus>>,
}

impl StatusAcquirer {
    pub fn new(client: Arc<MoonrakerClient>, metadata: Arc<MetadataCache>) -> Self {
        Self {
            client,
            metadata,
            last_status: RwLock::new(None),
        }
    }

    pub async fn fetch(&self) -> PrinterStatus {
        let mut status = match self.client.query_objects().await {
            Ok(objects) => self.assemble(objects).await,
            Err(e) => {
                warn!("Moonraker status query failed: {}", e);
                PrinterStatus::disconnected()
            }
        };

        let mut last = self.last_status.write().await;
        if let Some(prev) = last.as_ref() {
            // Timestamps are non-decreasing per acquirer, even across a
            // wall-clock adjustment.
            if status.timestamp < prev.timestamp {
                status.timestamp = prev.timestamp;
            }
        }
        *last = Some(status.clone());

        status
    }

    async fn assemble(&self, objects: ObjectStatus) -> PrinterStatus {
        let print_stats = objects.print_stats.unwrap_or_default();

        let raw_state = print_stats.state.as_deref().unwrap_or("unknown");
        let state = PrinterState::from_raw(raw_state);

        let progress_fraction = objects.virtual_sdcard.and_then(|sd| sd.progress);
        let progress = (progress_fraction.unwrap_or(0.0) * 100.0)
            .round()
            .clamp(0.0, 100.0) as u8;

        let filename = print_stats.filename.filter(|f| !f.is_empty());
        let print_duration = print_stats.print_duration;

        // No filename, no lookup: metadata and thumbnails only exist for
        // an active (or just-active) job.
        let (estimated_total, thumbnail) = match &filename {
            Some(name) => match self.metadata.get(name).await {
                Some(metadata) => (
                    metadata.estimated_time,
                    MetadataCache::resolve_thumbnail(name, &metadata),
                ),
                None => (None, None),
            },
            None => (None, None),
        };

        let time_remaining = estimate_remaining(print_duration, progress_fraction, estimated_total);

        let extruder = objects.extruder.unwrap_or_default();
        let heater_bed = objects.heater_bed.unwrap_or_default();

        debug!("Acquired status: {:?}, progress {}%", state, progress);

        PrinterStatus {
            state,
            progress,
            filename,
            extruder_temp: extruder.temperature,
            extruder_target: extruder.target,
            bed_temp: heater_bed.temperature,
            bed_target: heater_bed.target,
            print_duration,
            time_remaining,
            thumbnail,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Last snapshot produced by this acquirer. A liveness signal for
    /// the health endpoint, not authoritative data.
    pub async fn last_status(&self) -> Option<PrinterStatus> {
        self.last_status.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.last_status
            .read()
            .await
            .as_ref()
            .map(|s| s.state != PrinterState::Disconnected)
            .unwrap_or(false)
    }
}
