//! Synchronization API error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use vinculo_sync::ResyncDenied;

/// Error type for synchronization API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown organization or missing reporting configuration.
    #[error("organization not found or not configured: {0}")]
    OrgNotFound(Uuid),

    /// Malformed input or unknown event type.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resync attempted inside the minimum interval.
    #[error("synchronization already ran recently; next allowed at {}", denial.next_allowed)]
    ResyncDenied { denial: ResyncDenied },

    /// Job not present in the registry.
    #[error("sync job not found: {0}")]
    JobNotFound(Uuid),

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, body) = match &self {
            ApiError::OrgNotFound(_) => (
                StatusCode::NOT_FOUND,
                "org_not_found",
                json!({ "message": self.to_string() }),
            ),
            ApiError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                json!({ "message": self.to_string() }),
            ),
            ApiError::ResyncDenied { denial } => (
                StatusCode::TOO_MANY_REQUESTS,
                "resync_denied",
                json!({
                    "message": self.to_string(),
                    "last_sync": denial.last_sync,
                    "next_allowed_at": denial.next_allowed,
                }),
            ),
            ApiError::JobNotFound(_) => (
                StatusCode::NOT_FOUND,
                "job_not_found",
                json!({ "message": self.to_string() }),
            ),
            ApiError::Internal(_) => {
                error!(error = %self, "synchronization API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    json!({ "message": self.to_string() }),
                )
            }
        };

        let mut payload = body;
        payload["error"] = json!(error_type);
        (status, Json(payload)).into_response()
    }
}

/// Result alias for handler bodies.
pub type ApiResult<T> = Result<T, ApiError>;
