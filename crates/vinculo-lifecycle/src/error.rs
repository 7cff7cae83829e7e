//! Lifecycle error types.

use thiserror::Error;
use uuid::Uuid;

use vinculo_events::EventBuildError;
use vinculo_signer::SignatureError;
use vinculo_transport::{BusinessError, TransportError};

use crate::state::EventStatus;

/// Error that can occur while driving the event pipeline.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Event payload construction failed validation.
    #[error(transparent)]
    Build(#[from] EventBuildError),

    /// Certificate resolution or signing failed.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// The wire round trip failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The service answered with a well-formed refusal.
    #[error(transparent)]
    Business(#[from] BusinessError),

    /// Attempted a transition the state machine forbids.
    #[error("illegal transition {from} -> {to} for event {event_id}")]
    InvalidTransition {
        event_id: Uuid,
        from: EventStatus,
        to: EventStatus,
    },

    /// The event is not in the status the operation requires.
    #[error("event {event_id} is {actual}, expected {expected}")]
    WrongStatus {
        event_id: Uuid,
        expected: EventStatus,
        actual: EventStatus,
    },

    /// Event not found.
    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    /// Batch not found.
    #[error("batch not found: {0}")]
    BatchNotFound(Uuid),

    /// A batch operation needs at least one member.
    #[error("batch requires at least one event")]
    EmptyBatch,

    /// The batch has not been submitted yet.
    #[error("batch {0} has no protocol number")]
    BatchNotSubmitted(Uuid),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored row carries a value that no longer parses.
    #[error("corrupt stored record: {detail}")]
    CorruptRecord { detail: String },
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
