//! Event and batch state machines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a single event.
///
/// Transitions are monotonic: every edge moves toward a terminal state and
/// nothing ever moves backward. Manual re-submission clones the event into
/// a new `Preparing` row instead of rewinding this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Built (or about to be built), not yet signed.
    Preparing,
    /// Signed payload stored, awaiting submission.
    Signed,
    /// Accepted into a submitted batch, protocol captured.
    Sent,
    /// Government confirmed processing; receipt captured.
    Processed,
    /// A stage failed; automatic progression halted.
    Error,
    /// Government refused the event itself.
    Rejected,
}

impl EventStatus {
    /// Whether the event reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Error | Self::Rejected)
    }

    /// Whether the stored record may still be modified beyond error
    /// annotations.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        !matches!(self, Self::Processed | Self::Rejected)
    }

    /// The legal forward transitions.
    #[must_use]
    pub fn can_transition(self, to: EventStatus) -> bool {
        use EventStatus::{Error, Preparing, Processed, Rejected, Sent, Signed};
        matches!(
            (self, to),
            (Preparing, Signed)
                | (Preparing, Error)
                | (Signed, Sent)
                | (Signed, Error)
                | (Sent, Processed)
                | (Sent, Error)
                | (Sent, Rejected)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparing => write!(f, "preparing"),
            Self::Signed => write!(f, "signed"),
            Self::Sent => write!(f, "sent"),
            Self::Processed => write!(f, "processed"),
            Self::Error => write!(f, "error"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preparing" => Ok(Self::Preparing),
            "signed" => Ok(Self::Signed),
            "sent" => Ok(Self::Sent),
            "processed" => Ok(Self::Processed),
            "error" => Ok(Self::Error),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// Aggregate status of a batch, derived from its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Not yet submitted.
    Preparing,
    /// Submission succeeded for at least one member (partial success
    /// included).
    Sent,
    /// Every member confirmed processed.
    Processed,
    /// Every member failed.
    Error,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparing => write!(f, "preparing"),
            Self::Sent => write!(f, "sent"),
            Self::Processed => write!(f, "processed"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preparing" => Ok(Self::Preparing),
            "sent" => Ok(Self::Sent),
            "processed" => Ok(Self::Processed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown batch status: {other}")),
        }
    }
}

/// Batch status as a pure function of member statuses.
///
/// `Processed` requires every member processed; `Sent` means at least one
/// member made it to the service; `Error` requires every member failed.
#[must_use]
pub fn aggregate_batch_status(members: &[EventStatus]) -> BatchStatus {
    if members.is_empty() {
        return BatchStatus::Preparing;
    }
    if members.iter().all(|s| *s == EventStatus::Processed) {
        return BatchStatus::Processed;
    }
    if members
        .iter()
        .all(|s| matches!(s, EventStatus::Error | EventStatus::Rejected))
    {
        return BatchStatus::Error;
    }
    if members
        .iter()
        .any(|s| matches!(s, EventStatus::Sent | EventStatus::Processed | EventStatus::Rejected))
    {
        return BatchStatus::Sent;
    }
    BatchStatus::Preparing
}
