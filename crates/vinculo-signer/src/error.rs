//! Signature error types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use vinculo_core::validation::ValidationIssue;
use vinculo_core::OrgId;

/// Error that can occur while resolving material or signing a payload.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The organization has no active certificate.
    #[error("no active certificate for organization {org_id}")]
    NoActiveCertificate { org_id: OrgId },

    /// The active certificate's validity window has elapsed.
    #[error("certificate expired at {not_after}")]
    CertificateExpired { not_after: DateTime<Utc> },

    /// The active certificate is not yet inside its validity window.
    #[error("certificate not valid before {not_before}")]
    CertificateNotYetValid { not_before: DateTime<Utc> },

    /// Required signing material is absent (file handle for file-based
    /// certificates, thumbprint for hardware tokens).
    #[error("signing material missing: {detail}")]
    MaterialMissing { detail: String },

    /// The PKCS#12 archive could not be fetched from blob storage.
    #[error("failed to fetch certificate archive '{key}': {message}")]
    BlobFetch { key: String, message: String },

    /// Stored credential could not be decrypted.
    #[error("credential decryption failed: {message}")]
    Decryption { message: String },

    /// Stored credential could not be encrypted.
    #[error("credential encryption failed: {message}")]
    Encryption { message: String },

    /// The cryptographic signing operation itself failed.
    #[error("signing failed: {message}")]
    SigningFailed { message: String },

    /// The signed payload failed post-signature re-validation.
    #[error("signed payload failed re-validation with {} issue(s)", issues.len())]
    PostSignValidation { issues: Vec<ValidationIssue> },

    /// The hardware-token gateway is not configured or unreachable.
    #[error("hardware token unavailable: {message}")]
    TokenUnavailable { message: String },

    /// Database error while resolving certificates.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl SignatureError {
    /// Stable code for logs and API bodies.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoActiveCertificate { .. } => "NO_ACTIVE_CERTIFICATE",
            Self::CertificateExpired { .. } => "CERTIFICATE_EXPIRED",
            Self::CertificateNotYetValid { .. } => "CERTIFICATE_NOT_YET_VALID",
            Self::MaterialMissing { .. } => "MATERIAL_MISSING",
            Self::BlobFetch { .. } => "BLOB_FETCH_FAILED",
            Self::Decryption { .. } => "DECRYPTION_FAILED",
            Self::Encryption { .. } => "ENCRYPTION_FAILED",
            Self::SigningFailed { .. } => "SIGNING_FAILED",
            Self::PostSignValidation { .. } => "POST_SIGN_VALIDATION_FAILED",
            Self::TokenUnavailable { .. } => "TOKEN_UNAVAILABLE",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }
}

impl From<openssl::error::ErrorStack> for SignatureError {
    fn from(value: openssl::error::ErrorStack) -> Self {
        Self::SigningFailed {
            message: value.to_string(),
        }
    }
}

/// Result type for signature operations.
pub type SignatureResult<T> = Result<T, SignatureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let org_id = OrgId::new();
        assert_eq!(
            SignatureError::NoActiveCertificate { org_id }.error_code(),
            "NO_ACTIVE_CERTIFICATE"
        );
        assert_eq!(
            SignatureError::SigningFailed {
                message: "x".into()
            }
            .error_code(),
            "SIGNING_FAILED"
        );
    }

    #[test]
    fn test_display_mentions_org() {
        let org_id = OrgId::new();
        let err = SignatureError::NoActiveCertificate { org_id };
        assert!(err.to_string().contains(&org_id.to_string()));
    }
}
