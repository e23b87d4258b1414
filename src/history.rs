use crate::status::{PrinterState, PrinterStatus};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::info;
use uuid::Uuid;

/// Most records a history log retains. Oldest entries drop on overflow.
pub const MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// One finished print, captured at the moment the lifecycle edge fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRecord {
    pub id: String,
    pub filename: String,
    /// Unix millis.
    pub start_time: i64,
    pub end_time: i64,
    pub duration_ms: u64,
    pub outcome: PrintOutcome,
    /// Human-readable capture moment for direct display.
    pub timestamp: String,
}

/// Edge-triggered reducer over a stream of status snapshots.
///
/// Emits exactly one record per `{printing,paused} -> idle` transition;
/// every other snapshot only updates bookkeeping. Repeated snapshots with
/// an unchanged state never emit. One instance per consuming client; the
/// tracker has no global lifetime.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    last_state: Option<PrinterState>,
    last_filename: Option<String>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, status: &PrinterStatus) -> Option<LifecycleRecord> {
        let ended = matches!(
            self.last_state,
            Some(PrinterState::Printing | PrinterState::Paused)
        ) && status.state == PrinterState::Idle;

        let record = if ended {
            // The upstream API exposes no terminal-outcome field at this
            // point, so a clean finish is indistinguishable from a cancel.
            let filename = self
                .last_filename
                .clone()
                .or_else(|| status.filename.clone())
                .unwrap_or_else(|| "Unknown".to_string());

            let duration_ms = status
                .print_duration
                .map(|secs| (secs * 1000.0) as u64)
                .unwrap_or(0);

            let end_time = status.timestamp;

            info!("Print ended: {} ({} ms)", filename, duration_ms);

            Some(LifecycleRecord {
                id: Uuid::new_v4().to_string(),
                filename,
                start_time: end_time - duration_ms as i64,
                end_time,
                duration_ms,
                outcome: PrintOutcome::Completed,
                timestamp: Local::now().format("%d/%m/%Y %H:%M:%S").to_string(),
            })
        } else {
            None
        };

        self.last_state = Some(status.state);
        self.last_filename = status.filename.clone();

        record
    }
}

/// Aggregate stats over a history log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Percentage, 0-100.
    pub success_rate: f64,
    pub total_print_time_ms: u64,
}

/// Bounded, newest-first log of lifecycle records.
#[derive(Debug, Default)]
pub struct PrintHistory {
    records: VecDeque<LifecycleRecord>,
}

impl PrintHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: LifecycleRecord) {
        self.records.push_front(record);
        self.records.truncate(MAX_HISTORY);
    }

    pub fn records(&self) -> Vec<LifecycleRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> HistoryStats {
        let total = self.records.len();
        let completed = self
            .records
            .iter()
            .filter(|r| r.outcome == PrintOutcome::Completed)
            .count();
        let failed = self
            .records
            .iter()
            .filter(|r| r.outcome == PrintOutcome::Failed)
            .count();
        let cancelled = self
            .records
            .iter()
            .filter(|r| r.outcome == PrintOutcome::Cancelled)
            .count();
        let total_print_time_ms = self.records.iter().map(|r| r.duration_ms).sum();

        HistoryStats {
            total,
            completed,
            failed,
            cancelled,
            success_rate: if total > 0 {
                (completed as f64 / total as f64 * 100.0).round()
            } else {
                0.0
            },
            total_print_time_ms,
        }
    }
}

/// Tracker plus its log, as held per client session.
#[derive(Debug, Default)]
pub struct SessionHistory {
    tracker: LifecycleTracker,
    log: PrintHistory,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one snapshot through the tracker, logging any emitted record.
    pub fn observe(&mut self, status: &PrinterStatus) {
        if let Some(record) = self.tracker.observe(status) {
            self.log.push(record);
        }
    }

    pub fn records(&self) -> Vec<LifecycleRecord> {
        self.log.records()
    }

    pub fn stats(&self) -> HistoryStats {
        self.log.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(state: PrinterState, filename: Option<&str>, duration: Option<f64>) -> PrinterStatus {
        PrinterStatus {
            state,
            progress: 0,
            filename: filename.map(String::from),
            extruder_temp: 0.0,
            extruder_target: 0.0,
            bed_temp: 0.0,
            bed_target: 0.0,
            print_duration: duration,
            time_remaining: None,
            thumbnail: None,
            timestamp: 1_700_000_000_000,
        }
    }

    fn run(tracker: &mut LifecycleTracker, states: &[PrinterState]) -> Vec<LifecycleRecord> {
        states
            .iter()
            .filter_map(|&state| tracker.observe(&snapshot(state, None, None)))
            .collect()
    }

    #[test]
    fn test_print_to_idle_emits_once() {
        use PrinterState::*;
        let mut tracker = LifecycleTracker::new();
        let records = run(&mut tracker, &[Printing, Printing, Idle]);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_pause_resume_then_idle_emits_once() {
        use PrinterState::*;
        let mut tracker = LifecycleTracker::new();
        let records = run(&mut tracker, &[Printing, Paused, Printing, Idle]);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_paused_to_idle_emits() {
        use PrinterState::*;
        let mut tracker = LifecycleTracker::new();
        let records = run(&mut tracker, &[Printing, Paused, Idle]);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_idle_stream_emits_nothing() {
        use PrinterState::*;
        let mut tracker = LifecycleTracker::new();
        assert!(run(&mut tracker, &[Idle, Idle]).is_empty());
    }

    #[test]
    fn test_repeated_idle_after_print_emits_nothing_more() {
        use PrinterState::*;
        let mut tracker = LifecycleTracker::new();
        let records = run(&mut tracker, &[Printing, Idle, Idle, Idle]);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_disconnect_mid_print_does_not_emit() {
        use PrinterState::*;
        let mut tracker = LifecycleTracker::new();
        assert!(run(&mut tracker, &[Printing, Disconnected, Idle]).is_empty());
    }

    #[test]
    fn test_record_uses_remembered_filename() {
        let mut tracker = LifecycleTracker::new();
        tracker.observe(&snapshot(PrinterState::Printing, Some("benchy.gcode"), Some(100.0)));
        // The idle snapshot no longer carries the filename.
        let record = tracker
            .observe(&snapshot(PrinterState::Idle, None, Some(3600.0)))
            .unwrap();
        assert_eq!(record.filename, "benchy.gcode");
        assert_eq!(record.duration_ms, 3_600_000);
        assert_eq!(record.outcome, PrintOutcome::Completed);
    }

    #[test]
    fn test_record_falls_back_to_snapshot_filename_then_placeholder() {
        let mut tracker = LifecycleTracker::new();
        tracker.observe(&snapshot(PrinterState::Printing, None, None));
        let record = tracker
            .observe(&snapshot(PrinterState::Idle, Some("late.gcode"), None))
            .unwrap();
        assert_eq!(record.filename, "late.gcode");

        let mut tracker = LifecycleTracker::new();
        tracker.observe(&snapshot(PrinterState::Printing, None, None));
        let record = tracker.observe(&snapshot(PrinterState::Idle, None, None)).unwrap();
        assert_eq!(record.filename, "Unknown");
        assert_eq!(record.duration_ms, 0);
    }

    fn record(filename: &str) -> LifecycleRecord {
        LifecycleRecord {
            id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            start_time: 0,
            end_time: 0,
            duration_ms: 1000,
            outcome: PrintOutcome::Completed,
            timestamp: "01/01/2026 12:00:00".to_string(),
        }
    }

    #[test]
    fn test_history_is_newest_first() {
        let mut history = PrintHistory::new();
        history.push(record("first.gcode"));
        history.push(record("second.gcode"));
        let records = history.records();
        assert_eq!(records[0].filename, "second.gcode");
        assert_eq!(records[1].filename, "first.gcode");
    }

    #[test]
    fn test_history_caps_at_fifty_dropping_oldest() {
        let mut history = PrintHistory::new();
        for i in 0..51 {
            history.push(record(&format!("print-{}.gcode", i)));
        }
        assert_eq!(history.len(), MAX_HISTORY);
        let records = history.records();
        assert_eq!(records[0].filename, "print-50.gcode");
        // print-0 was the oldest and is gone.
        assert!(records.iter().all(|r| r.filename != "print-0.gcode"));
    }

    #[test]
    fn test_stats() {
        let mut history = PrintHistory::new();
        assert_eq!(history.stats().success_rate, 0.0);

        history.push(record("a.gcode"));
        history.push(record("b.gcode"));
        let stats = history.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.success_rate, 100.0);
        assert_eq!(stats.total_print_time_ms, 2000);
    }

    #[test]
    fn test_session_history_records_edges() {
        let mut session = SessionHistory::new();
        session.observe(&snapshot(PrinterState::Printing, Some("a.gcode"), Some(60.0)));
        session.observe(&snapshot(PrinterState::Idle, None, Some(60.0)));
        session.observe(&snapshot(PrinterState::Idle, None, None));
        assert_eq!(session.records().len(), 1);
        assert_eq!(session.stats().total, 1);
    }
}
