//! Vinculo Core Library
//!
//! Shared types for the vinculo workspace.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (`OrgId`, `EventId`, `BatchId`, ...)
//! - [`documents`] - Fiscal document types with checksum validation (`Cpf`, `Cnpj`, `Competence`)
//! - [`validation`] - Named-rule validation engine accumulating errors and warnings
//! - [`error`] - Standardized error types (`CoreError`)

pub mod documents;
pub mod error;
pub mod ids;
pub mod validation;

pub use documents::{Cnpj, Competence, Cpf};
pub use error::{CoreError, Result};
pub use ids::{BatchId, CertificateId, EventId, JobId, OrgId};
pub use validation::{IssueLevel, ValidationIssue, ValidationOutcome, Validator};
