//! # Signature Layer
//!
//! Resolves an organization's signing material and produces enveloped XML
//! digital signatures over built event payloads.
//!
//! - [`certificate`] - certificate model, provider trait, Postgres provider
//! - [`crypto`] - AES-256-GCM credential encryption with per-organization keys
//! - [`signer`] - pluggable signing backends (A1 file-based, A3 hardware token)
//! - [`service`] - the signature service: resolve, sign, re-validate

pub mod certificate;
pub mod crypto;
pub mod error;
pub mod service;
pub mod signer;

#[cfg(test)]
pub(crate) mod testutil;

pub use certificate::{
    BlobStore, Certificate, CertificateKind, CertificateMaterial, CertificateProvider,
    PgCertificateProvider,
};
pub use crypto::CredentialEncryption;
pub use error::{SignatureError, SignatureResult};
pub use service::{SignatureService, SignedEvent};
pub use signer::{A1Signer, SigningMaterial, TokenGateway, XmlSigner};
