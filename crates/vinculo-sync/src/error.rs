//! Synchronization error types.

use thiserror::Error;
use vinculo_core::JobId;
use vinculo_transport::TransportError;

/// Error that can occur during synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The wire round trip failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Requested job does not exist in the registry.
    #[error("sync job not found: {0}")]
    JobNotFound(JobId),

    /// Only pending jobs can be cancelled.
    #[error("sync job {0} is not pending and cannot be cancelled")]
    NotCancellable(JobId),

    /// The organization has no reporting configuration.
    #[error("organization {0} has no reporting configuration")]
    OrgNotConfigured(String),

    /// Every requested event type failed.
    #[error("all event types failed: {detail}")]
    AllTypesFailed { detail: String },

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
