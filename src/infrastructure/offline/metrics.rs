use crate::domain::entities::DrainReport;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrainOutcomeStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncDrainMetricsSnapshot {
    pub total_drains: u64,
    pub total_success: u64,
    pub total_failure: u64,
    pub consecutive_failure: u64,
    pub completed_actions: u64,
    pub failed_actions: u64,
    pub conflicts: u64,
    pub last_outcome: Option<DrainOutcomeStatus>,
    pub last_trigger: Option<String>,
    pub last_duration_ms: Option<u64>,
    pub last_timestamp_ms: Option<u64>,
}

#[derive(Default, Clone)]
struct LastDrainMetadata {
    outcome: Option<DrainOutcomeStatus>,
    trigger: Option<String>,
    duration_ms: Option<u64>,
    timestamp_ms: Option<u64>,
}

struct SyncDrainMetrics {
    drains: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    consecutive_failure: AtomicU64,
    completed_actions: AtomicU64,
    failed_actions: AtomicU64,
    conflicts: AtomicU64,
    metadata: Mutex<LastDrainMetadata>,
}

impl SyncDrainMetrics {
    fn new() -> Self {
        Self {
            drains: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            consecutive_failure: AtomicU64::new(0),
            completed_actions: AtomicU64::new(0),
            failed_actions: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            metadata: Mutex::new(LastDrainMetadata::default()),
        }
    }

    fn record(&self, report: &DrainReport, succeeded: bool) {
        self.drains.fetch_add(1, Ordering::Relaxed);
        self.completed_actions
            .fetch_add(report.completed.len() as u64, Ordering::Relaxed);
        self.failed_actions
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
        self.conflicts
            .fetch_add(report.new_conflicts.len() as u64, Ordering::Relaxed);

        let outcome = if succeeded {
            self.success.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failure.store(0, Ordering::Relaxed);
            DrainOutcomeStatus::Success
        } else {
            self.failure.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failure.fetch_add(1, Ordering::Relaxed);
            DrainOutcomeStatus::Failure
        };

        let duration_ms = (report.finished_at - report.started_at)
            .num_milliseconds()
            .max(0) as u64;

        if let Ok(mut metadata) = self.metadata.lock() {
            *metadata = LastDrainMetadata {
                outcome: Some(outcome),
                trigger: Some(report.trigger.to_string()),
                duration_ms: Some(duration_ms),
                timestamp_ms: Some(report.finished_at.timestamp_millis().max(0) as u64),
            };
        }
    }

    fn snapshot(&self) -> SyncDrainMetricsSnapshot {
        let metadata = self
            .metadata
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default();

        SyncDrainMetricsSnapshot {
            total_drains: self.drains.load(Ordering::Relaxed),
            total_success: self.success.load(Ordering::Relaxed),
            total_failure: self.failure.load(Ordering::Relaxed),
            consecutive_failure: self.consecutive_failure.load(Ordering::Relaxed),
            completed_actions: self.completed_actions.load(Ordering::Relaxed),
            failed_actions: self.failed_actions.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            last_outcome: metadata.outcome,
            last_trigger: metadata.trigger,
            last_duration_ms: metadata.duration_ms,
            last_timestamp_ms: metadata.timestamp_ms,
        }
    }
}

static METRICS: LazyLock<SyncDrainMetrics> = LazyLock::new(SyncDrainMetrics::new);

pub fn record_drain(report: &DrainReport, succeeded: bool) {
    METRICS.record(report, succeeded);
}

pub fn snapshot() -> SyncDrainMetricsSnapshot {
    METRICS.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::DrainTrigger;
    use chrono::{Duration, Utc};

    // プロセス共有のカウンタなので差分で検証する
    #[test]
    fn record_drain_accumulates_counts() {
        let before = snapshot();

        let started = Utc::now();
        let mut report = DrainReport::new(DrainTrigger::Scheduled, started);
        report.finished_at = started + Duration::milliseconds(25);
        record_drain(&report, false);

        let after = snapshot();
        assert!(after.total_drains > before.total_drains);
        assert!(after.total_failure > before.total_failure);
        assert!(after.last_timestamp_ms.is_some());
    }
}
