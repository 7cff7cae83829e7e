//! Error Types
//!
//! Standardized error type shared across the vinculo workspace. Component
//! crates define richer errors of their own; this covers the failures the
//! core types themselves can produce.

use serde::Serialize;
use thiserror::Error;

use crate::documents::DocumentError;
use crate::validation::ValidationIssue;

/// Standardized error type for vinculo core operations.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreError {
    /// One or more error-level validation issues.
    #[error("validation failed with {} issue(s)", issues.len())]
    Validation {
        /// The full issue list, warnings included.
        issues: Vec<ValidationIssue>,
    },

    /// A fiscal document failed format or checksum validation.
    #[error("invalid document: {message}")]
    InvalidDocument { message: String },

    /// Requested resource was not found.
    #[error("{resource} not found{}", id.as_ref().map(|i| format!(": {i}")).unwrap_or_default())]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl From<DocumentError> for CoreError {
    fn from(value: DocumentError) -> Self {
        Self::InvalidDocument {
            message: value.to_string(),
        }
    }
}

/// Result alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::Cpf;

    #[test]
    fn test_document_error_converts() {
        let err: CoreError = Cpf::parse("123").unwrap_err().into();
        assert!(matches!(err, CoreError::InvalidDocument { .. }));
    }

    #[test]
    fn test_validation_error_display_counts_issues() {
        let err = CoreError::Validation {
            issues: vec![
                ValidationIssue::error("a", "first"),
                ValidationIssue::warning("b", "second"),
            ],
        };
        assert_eq!(err.to_string(), "validation failed with 2 issue(s)");
    }
}
