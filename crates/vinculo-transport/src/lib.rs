//! # Transport Client
//!
//! Wraps signed payloads and queries in the government batch envelope
//! protocol, performs the mutual-TLS round trip and parses the
//! acknowledgement: protocol numbers, receipt numbers and structured
//! occurrence records.
//!
//! Transport failures (network, timeout, non-2xx, malformed body) are kept
//! strictly apart from business failures (a well-formed negative response),
//! so callers can classify retries correctly.

pub mod client;
pub mod envelope;
pub mod error;
pub mod response;

pub use client::{EsocialClient, EventEnvelope, MtlsIdentity, TransportClient, TransportConfig};
pub use envelope::{EmployerIdent, EndpointSet};
pub use error::{BusinessError, TransportError, TransportResult};
pub use response::{
    BatchSituation, ConsultEventsResponse, DownloadResponse, EventResult, Occurrence,
    OccurrenceSeverity, QueryResponse, SubmitResponse,
};
