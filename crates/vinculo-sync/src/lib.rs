//! # Reconciliation & Synchronization
//!
//! Consumes the government worker-lifecycle event stream and consolidates
//! it into one authoritative record per worker, then coordinates repeated
//! reconciliation runs per organization under a bounded worker pool.
//!
//! - [`raw`] - parsing of downloaded lifecycle events, duplicate discarding
//! - [`engine`] - the consolidation fold: group, sort, fold, hash
//! - [`worker_repo`] - consolidated-worker persistence (natural-key upserts)
//! - [`scheduler`] - bounded-concurrency job scheduler with a resync gate
//! - [`runner`] - the job body: fetch each event type, reconcile, persist

pub mod engine;
pub mod error;
pub mod raw;
pub mod runner;
pub mod scheduler;
pub mod stats;
pub mod worker_repo;

pub use engine::{classify_change, reconcile, ChangeKind, ConsolidatedWorker, WorkerStatus};
pub use error::{SyncError, SyncResult};
pub use raw::{dedup_events, parse_lifecycle_events, RawLifecycleEvent};
pub use runner::{EsocialSyncRunner, OrgDirectory, OrgEndpoint, RunOutcome, SyncParams, SyncRunner};
pub use scheduler::{
    JobKind, JobStatus, ResyncDenied, SchedulerConfig, SchedulerStats, SyncJob, SyncScheduler,
};
pub use stats::SyncStats;
pub use worker_repo::ConsolidatedWorkerRow;

// The lifecycle event family the engine consumes.
pub use vinculo_events::EventType;
