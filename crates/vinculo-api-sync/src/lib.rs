//! # Synchronization API
//!
//! HTTP surface for triggering and inspecting worker synchronizations.
//!
//! Response contract of the trigger endpoint: 200 full success with stats,
//! 207 partial success enumerating the event types that failed, 400
//! malformed input or unknown event type, 404 unknown organization or
//! missing reporting configuration, 429 inside the minimum resync interval
//! (unless forced, with the exact next-permitted instant), 500 unexpected
//! failure.

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;

pub use error::{ApiError, ApiResult};
pub use router::{router, AppState};
