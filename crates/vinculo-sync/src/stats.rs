//! Run statistics tracking for synchronization jobs.

use serde::{Deserialize, Serialize};

/// Aggregate statistics of one synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Raw lifecycle events fetched and fed to reconciliation.
    #[serde(default)]
    pub raw_events_processed: u64,
    /// Workers created on this run.
    #[serde(default)]
    pub workers_new: u64,
    /// Workers whose consolidated record changed.
    #[serde(default)]
    pub workers_updated: u64,
    /// Workers whose change hash matched the stored record.
    #[serde(default)]
    pub workers_unchanged: u64,
    /// Malformed events logged and skipped.
    #[serde(default)]
    pub events_skipped: u64,
    /// Wall-clock duration of the run.
    #[serde(default)]
    pub duration_ms: u64,
}

impl SyncStats {
    /// Merge another run's counters into this one.
    pub fn merge(&mut self, other: &SyncStats) {
        self.raw_events_processed += other.raw_events_processed;
        self.workers_new += other.workers_new;
        self.workers_updated += other.workers_updated;
        self.workers_unchanged += other.workers_unchanged;
        self.events_skipped += other.events_skipped;
        self.duration_ms += other.duration_ms;
    }
}
