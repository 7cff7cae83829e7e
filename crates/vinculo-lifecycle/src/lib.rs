//! # Lifecycle Manager
//!
//! Orchestrates the event pipeline - build, sign, submit, track - and owns
//! the persisted state of events and batches.
//!
//! Event states move only forward along `Preparing -> Signed -> Sent ->
//! {Processed | Error | Rejected}`; re-submission is an explicit action that
//! clones the event back into a fresh `Preparing` row. A batch's status is a
//! pure function of its members' statuses, recomputed on every member
//! change.

pub mod error;
pub mod manager;
pub mod model;
pub mod state;

pub use error::{LifecycleError, LifecycleResult};
pub use manager::LifecycleManager;
pub use model::{AuditLogEntry, BatchRecord, ErrorAnnotation, EventRecord};
pub use state::{aggregate_batch_status, BatchStatus, EventStatus};
