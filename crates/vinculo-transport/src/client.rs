//! HTTP client for the government reporting endpoints.
//!
//! One request/response round trip per operation over an encrypted channel:
//! TLS 1.2 minimum, mutual TLS identity supplied per call (never cached on
//! the client) and a fixed 30-second upper bound after which the operation
//! is a transport failure, never silently retried.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::envelope::{self, soap_action, EmployerIdent, EndpointSet};
use crate::error::{TransportError, TransportResult};
use crate::response::{ConsultEventsResponse, DownloadResponse, QueryResponse, SubmitResponse};

/// Protocol-mandated upper bound for one round trip.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client-certificate material for mutual TLS, supplied per call.
#[derive(Clone)]
pub struct MtlsIdentity {
    pub pkcs12_der: Vec<u8>,
    pub password: String,
}

impl std::fmt::Debug for MtlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log key material.
        f.debug_struct("MtlsIdentity")
            .field("pkcs12_der", &format!("{} bytes", self.pkcs12_der.len()))
            .finish_non_exhaustive()
    }
}

/// A signed event ready for batch submission.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub event_id: String,
    pub signed_xml: String,
}

/// The three wire operations of the batch protocol.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Submit a batch of signed events.
    async fn submit_batch(
        &self,
        employer: &EmployerIdent,
        events: &[EventEnvelope],
        identity: Option<&MtlsIdentity>,
    ) -> TransportResult<SubmitResponse>;

    /// Query the processing state of a submitted batch.
    async fn query_batch(
        &self,
        employer: &EmployerIdent,
        protocol: &str,
        identity: Option<&MtlsIdentity>,
    ) -> TransportResult<QueryResponse>;

    /// Download the government-side record of a processed event.
    async fn download_event(
        &self,
        employer: &EmployerIdent,
        receipt: &str,
        identity: Option<&MtlsIdentity>,
    ) -> TransportResult<DownloadResponse>;

    /// Consult the government event stream: every event of one type inside
    /// a reporting period. This is the feed the reconciliation engine rides.
    async fn consult_events(
        &self,
        employer: &EmployerIdent,
        event_code: &str,
        period_start: &str,
        period_end: &str,
        identity: Option<&MtlsIdentity>,
    ) -> TransportResult<ConsultEventsResponse>;
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoints: EndpointSet,
    pub timeout_secs: u64,
}

impl TransportConfig {
    /// Configuration for the production environment.
    #[must_use]
    pub fn production() -> Self {
        Self {
            endpoints: EndpointSet::production(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Configuration for the restricted-production environment.
    #[must_use]
    pub fn restricted() -> Self {
        Self {
            endpoints: EndpointSet::restricted(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// reqwest-backed implementation of [`TransportClient`].
pub struct EsocialClient {
    config: TransportConfig,
}

impl EsocialClient {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// A fresh HTTP client for one call, carrying the per-call identity.
    fn build_http_client(
        &self,
        identity: Option<&MtlsIdentity>,
    ) -> TransportResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .use_native_tls()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .timeout(Duration::from_secs(self.config.timeout_secs));

        if let Some(identity) = identity {
            let identity =
                reqwest::Identity::from_pkcs12_der(&identity.pkcs12_der, &identity.password)
                    .map_err(|e| TransportError::Identity {
                        message: e.to_string(),
                    })?;
            builder = builder.identity(identity);
        }

        builder.build().map_err(|e| TransportError::Connection {
            message: format!("failed to build HTTP client: {e}"),
            source: Some(Box::new(e)),
        })
    }

    async fn round_trip(
        &self,
        url: &str,
        soap_action: &str,
        body: String,
        identity: Option<&MtlsIdentity>,
    ) -> TransportResult<String> {
        let client = self.build_http_client(identity)?;
        let response = client
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", soap_action)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.config.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "endpoint answered non-2xx");
            return Err(TransportError::Http {
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.config.timeout_secs))
    }
}

#[async_trait]
impl TransportClient for EsocialClient {
    #[instrument(skip(self, events, identity), fields(event_count = events.len()))]
    async fn submit_batch(
        &self,
        employer: &EmployerIdent,
        events: &[EventEnvelope],
        identity: Option<&MtlsIdentity>,
    ) -> TransportResult<SubmitResponse> {
        let entries: Vec<(String, String)> = events
            .iter()
            .map(|e| (e.event_id.clone(), e.signed_xml.clone()))
            .collect();
        let body = envelope::submit_envelope(employer, &entries);
        let answer = self
            .round_trip(
                &self.config.endpoints.submit,
                soap_action::SUBMIT,
                body,
                identity,
            )
            .await?;
        let response = SubmitResponse::parse(&answer)?;
        debug!(
            accepted = response.accepted(),
            protocol = response.protocol.as_deref().unwrap_or("-"),
            "batch submission answered"
        );
        Ok(response)
    }

    #[instrument(skip(self, identity))]
    async fn query_batch(
        &self,
        employer: &EmployerIdent,
        protocol: &str,
        identity: Option<&MtlsIdentity>,
    ) -> TransportResult<QueryResponse> {
        let body = envelope::query_envelope(employer, protocol);
        let answer = self
            .round_trip(
                &self.config.endpoints.query,
                soap_action::QUERY,
                body,
                identity,
            )
            .await?;
        QueryResponse::parse(&answer)
    }

    #[instrument(skip(self, identity))]
    async fn download_event(
        &self,
        employer: &EmployerIdent,
        receipt: &str,
        identity: Option<&MtlsIdentity>,
    ) -> TransportResult<DownloadResponse> {
        let body = envelope::download_envelope(employer, receipt);
        let answer = self
            .round_trip(
                &self.config.endpoints.download,
                soap_action::DOWNLOAD,
                body,
                identity,
            )
            .await?;
        DownloadResponse::parse(&answer)
    }

    #[instrument(skip(self, identity))]
    async fn consult_events(
        &self,
        employer: &EmployerIdent,
        event_code: &str,
        period_start: &str,
        period_end: &str,
        identity: Option<&MtlsIdentity>,
    ) -> TransportResult<ConsultEventsResponse> {
        let body = envelope::consult_envelope(employer, event_code, period_start, period_end);
        let answer = self
            .round_trip(
                &self.config.endpoints.consult,
                soap_action::CONSULT,
                body,
                identity,
            )
            .await?;
        let response = ConsultEventsResponse::parse(&answer)?;
        debug!(
            event_code,
            events = response.events.len(),
            "event consultation answered"
        );
        Ok(response)
    }
}
