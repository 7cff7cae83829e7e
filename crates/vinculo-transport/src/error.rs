//! Transport error types.
//!
//! [`TransportError`] covers everything that went wrong getting a response;
//! [`BusinessError`] is a well-formed negative answer from the government
//! service. The two are never conflated: only transport errors are
//! transient.

use thiserror::Error;

use crate::response::Occurrence;

/// Failure before a usable response was obtained.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The round trip exceeded the protocol's fixed upper bound.
    #[error("request timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Connection-level failure (DNS, refused, TLS handshake).
    #[error("connection failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The endpoint answered outside the 2xx range.
    #[error("service answered HTTP {status}")]
    Http { status: u16 },

    /// A 2xx response was missing expected fields or was not parseable.
    #[error("malformed response: {detail}")]
    MalformedResponse { detail: String },

    /// The mTLS identity could not be loaded.
    #[error("invalid client identity: {message}")]
    Identity { message: String },
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Connection { .. } | Self::Http { status: 500..=599 }
        )
    }

    /// Stable code for logs and persisted error annotations.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "TRANSPORT_TIMEOUT",
            Self::Connection { .. } => "TRANSPORT_CONNECTION",
            Self::Http { .. } => "TRANSPORT_HTTP",
            Self::MalformedResponse { .. } => "TRANSPORT_MALFORMED",
            Self::Identity { .. } => "TRANSPORT_IDENTITY",
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            return Self::Timeout { timeout_secs };
        }
        if let Some(status) = err.status() {
            return Self::Http {
                status: status.as_u16(),
            };
        }
        Self::Connection {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// A well-formed negative answer from the government service.
#[derive(Debug, Clone, Error)]
#[error("service refused the request (code {code}): {description}")]
pub struct BusinessError {
    /// Response discriminator code (`cdResposta`).
    pub code: String,
    pub description: String,
    /// Structured occurrence records attached to the refusal.
    pub occurrences: Vec<Occurrence>,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Timeout { timeout_secs: 30 }.is_transient());
        assert!(TransportError::Http { status: 503 }.is_transient());
        assert!(!TransportError::Http { status: 404 }.is_transient());
        assert!(!TransportError::MalformedResponse {
            detail: "x".into()
        }
        .is_transient());
    }

    #[test]
    fn test_business_error_display() {
        let err = BusinessError {
            code: "301".to_string(),
            description: "lote incorreto".to_string(),
            occurrences: vec![],
        };
        assert!(err.to_string().contains("301"));
        assert!(err.to_string().contains("lote incorreto"));
    }
}
