//! Certificate model and provider.
//!
//! Each organization holds exactly one active certificate at a time. The
//! provider resolves it together with its signing material reference: a blob
//! key for file-based (A1) certificates, a thumbprint for hardware-token
//! (A3) identities.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use vinculo_core::{CertificateId, OrgId};

use crate::error::{SignatureError, SignatureResult};

/// Kind of certificate material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateKind {
    /// A1: PKCS#12 archive stored in blob storage.
    FileBased,
    /// A3: private key held on a hardware token, addressed by thumbprint.
    HardwareToken,
}

impl fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileBased => write!(f, "file_based"),
            Self::HardwareToken => write!(f, "hardware_token"),
        }
    }
}

impl FromStr for CertificateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file_based" => Ok(Self::FileBased),
            "hardware_token" => Ok(Self::HardwareToken),
            other => Err(format!("unknown certificate kind: {other}")),
        }
    }
}

/// Opaque reference to the signing material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CertificateMaterial {
    /// Blob-store key of the PKCS#12 archive plus the encrypted archive
    /// password (nonce || ciphertext || tag, see [`crate::crypto`]).
    PfxRef {
        blob_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        encrypted_password: Option<Vec<u8>>,
    },
    /// Thumbprint of the token-held certificate.
    Thumbprint { value: String },
}

/// A digital certificate registered for an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    pub org_id: OrgId,
    pub kind: CertificateKind,
    /// Subject common name, for display and audit.
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub material: CertificateMaterial,
    pub active: bool,
}

impl Certificate {
    /// Check the validity window at `now`.
    pub fn check_validity(&self, now: DateTime<Utc>) -> SignatureResult<()> {
        if now < self.not_before {
            return Err(SignatureError::CertificateNotYetValid {
                not_before: self.not_before,
            });
        }
        if now > self.not_after {
            return Err(SignatureError::CertificateExpired {
                not_after: self.not_after,
            });
        }
        Ok(())
    }
}

/// Resolves signing material for organizations.
#[async_trait]
pub trait CertificateProvider: Send + Sync {
    /// The single active certificate of `org_id`, if any.
    async fn active_certificate(&self, org_id: OrgId) -> SignatureResult<Option<Certificate>>;

    /// Fetch the raw PKCS#12 archive for a file-based certificate.
    async fn fetch_pkcs12(&self, blob_key: &str) -> SignatureResult<Vec<u8>>;
}

/// Read access to the blob store holding PKCS#12 archives.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, String>;
}

/// Database row backing [`Certificate`].
#[derive(Debug, sqlx::FromRow)]
struct CertificateRow {
    id: Uuid,
    org_id: Uuid,
    kind: String,
    subject: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    blob_key: Option<String>,
    encrypted_password: Option<Vec<u8>>,
    thumbprint: Option<String>,
    active: bool,
}

impl CertificateRow {
    fn into_certificate(self) -> SignatureResult<Certificate> {
        let kind: CertificateKind =
            self.kind
                .parse()
                .map_err(|message: String| SignatureError::MaterialMissing {
                    detail: message,
                })?;
        let material = match kind {
            CertificateKind::FileBased => CertificateMaterial::PfxRef {
                blob_key: self.blob_key.ok_or_else(|| SignatureError::MaterialMissing {
                    detail: "file-based certificate without blob key".to_string(),
                })?,
                encrypted_password: self.encrypted_password,
            },
            CertificateKind::HardwareToken => CertificateMaterial::Thumbprint {
                value: self.thumbprint.ok_or_else(|| SignatureError::MaterialMissing {
                    detail: "hardware-token certificate without thumbprint".to_string(),
                })?,
            },
        };
        Ok(Certificate {
            id: CertificateId::from_uuid(self.id),
            org_id: OrgId::from_uuid(self.org_id),
            kind,
            subject: self.subject,
            not_before: self.not_before,
            not_after: self.not_after,
            material,
            active: self.active,
        })
    }
}

/// Certificate provider backed by Postgres and a blob store.
pub struct PgCertificateProvider {
    pool: PgPool,
    blobs: Arc<dyn BlobStore>,
}

impl PgCertificateProvider {
    pub fn new(pool: PgPool, blobs: Arc<dyn BlobStore>) -> Self {
        Self { pool, blobs }
    }

    /// Activate a certificate, deactivating any sibling of the same
    /// organization in the same transaction so the single-active invariant
    /// holds even under concurrent activations.
    pub async fn activate(&self, org_id: OrgId, id: CertificateId) -> SignatureResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE certificates SET active = FALSE WHERE org_id = $1 AND active")
            .bind(org_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE certificates SET active = TRUE WHERE org_id = $1 AND id = $2")
            .bind(org_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CertificateProvider for PgCertificateProvider {
    async fn active_certificate(&self, org_id: OrgId) -> SignatureResult<Option<Certificate>> {
        let row: Option<CertificateRow> = sqlx::query_as(
            r#"
            SELECT id, org_id, kind, subject, not_before, not_after,
                   blob_key, encrypted_password, thumbprint, active
            FROM certificates
            WHERE org_id = $1 AND active
            "#,
        )
        .bind(org_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CertificateRow::into_certificate).transpose()
    }

    async fn fetch_pkcs12(&self, blob_key: &str) -> SignatureResult<Vec<u8>> {
        self.blobs
            .fetch(blob_key)
            .await
            .map_err(|message| SignatureError::BlobFetch {
                key: blob_key.to_string(),
                message,
            })
    }
}
