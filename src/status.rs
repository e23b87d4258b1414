use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Canonical printer state served to every display surface. Klipper's
/// raw vocabulary is collapsed into these five values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterState {
    Printing,
    Paused,
    Idle,
    Error,
    Disconnected,
}

impl PrinterState {
    /// Map a raw Klipper state string to a canonical state.
    ///
    /// Case-insensitive. Exact matches are checked before substring
    /// matches so e.g. a hypothetical "not_printing" can never land on
    /// `Printing`. Unrecognized states fall open to `Idle` rather than
    /// alarming the display with a spurious error.
    pub fn from_raw(raw: &str) -> Self {
        let lower = raw.to_lowercase();

        match lower.as_str() {
            "printing" => return Self::Printing,
            "paused" => return Self::Paused,
            "complete" | "standby" | "ready" | "cancelled" => return Self::Idle,
            "error" | "shutdown" => return Self::Error,
            _ => {}
        }

        if lower.contains("printing") {
            Self::Printing
        } else if lower.contains("paused") {
            Self::Paused
        } else if lower.contains("standby") || lower.contains("ready") {
            Self::Idle
        } else if lower.contains("error") || lower.contains("shutdown") {
            Self::Error
        } else {
            warn!("Unrecognized printer state '{}', treating as idle", raw);
            Self::Idle
        }
    }
}

/// One immutable, normalized status snapshot as served to displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterStatus {
    pub state: PrinterState,
    /// 0-100, clamped. Reported 0 while idle or disconnected.
    pub progress: u8,
    pub filename: Option<String>,
    pub extruder_temp: f64,
    pub extruder_target: f64,
    pub bed_temp: f64,
    pub bed_target: f64,
    /// Seconds elapsed in the current job.
    pub print_duration: Option<f64>,
    /// Seconds left, None when inestimable. Never negative.
    pub time_remaining: Option<f64>,
    /// Local proxy path or inline data URL for the job's preview image.
    pub thumbnail: Option<String>,
    /// Acquisition time, Unix millis. Non-decreasing per acquirer.
    pub timestamp: i64,
}

impl PrinterStatus {
    /// The sentinel returned when Moonraker cannot be reached. Not a
    /// partial measurement: everything except the timestamp is zeroed.
    pub fn disconnected() -> Self {
        Self {
            state: PrinterState::Disconnected,
            progress: 0,
            filename: None,
            extruder_temp: 0.0,
            extruder_target: 0.0,
            bed_temp: 0.0,
            bed_target: 0.0,
            print_duration: None,
            time_remaining: None,
            thumbnail: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Estimate the seconds left in the current job.
///
/// Prefers an absolute estimate from file metadata; otherwise extrapolates
/// linearly from elapsed time and progress. Returns None when neither
/// signal allows an estimate; never guesses and never divides by zero.
pub fn estimate_remaining(
    elapsed: Option<f64>,
    progress: Option<f64>,
    estimated_total: Option<f64>,
) -> Option<f64> {
    if let Some(total) = estimated_total {
        return Some((total - elapsed.unwrap_or(0.0)).max(0.0));
    }

    match (elapsed, progress) {
        (Some(elapsed), Some(progress)) if progress > 0.0 && progress < 1.0 => {
            Some(((elapsed / progress) - elapsed).round().max(0.0))
        }
        _ => None,
    }
}
