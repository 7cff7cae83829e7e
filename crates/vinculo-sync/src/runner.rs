//! Synchronization job body.
//!
//! One run fetches each requested lifecycle event type sequentially (to
//! bound load on the remote service), feeds the results to the
//! reconciliation engine and persists the consolidated workers. A failing
//! event type is recorded and the remaining types still run; the caller
//! reports partial success rather than silently dropping the failure.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use vinculo_core::{Competence, OrgId};
use vinculo_events::EventType;
use vinculo_transport::{EmployerIdent, MtlsIdentity, TransportClient};

use crate::engine::reconcile;
use crate::error::{SyncError, SyncResult};
use crate::raw::{dedup_events, parse_lifecycle_events};
use crate::stats::SyncStats;
use crate::worker_repo::{audit_raw_events, persist_workers};

/// Parameters of one synchronization run.
#[derive(Debug, Clone)]
pub struct SyncParams {
    pub period_start: Competence,
    pub period_end: Competence,
    /// Lifecycle event types to fetch. Always processed in the fixed
    /// [`EventType::LIFECYCLE`] order regardless of request order.
    pub event_types: Vec<EventType>,
}

impl SyncParams {
    /// All lifecycle types over the given period.
    #[must_use]
    pub fn lifecycle(period_start: Competence, period_end: Competence) -> Self {
        Self {
            period_start,
            period_end,
            event_types: EventType::LIFECYCLE.to_vec(),
        }
    }

    /// The requested types in canonical fetch order.
    #[must_use]
    pub fn ordered_types(&self) -> Vec<EventType> {
        EventType::LIFECYCLE
            .into_iter()
            .filter(|t| self.event_types.contains(t))
            .collect()
    }
}

/// Result of one synchronization run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stats: SyncStats,
    /// Event types that failed, with the failure description.
    pub type_failures: Vec<(EventType, String)>,
}

impl RunOutcome {
    /// Some types succeeded, some failed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.type_failures.is_empty()
    }
}

/// Executes one synchronization run for an organization.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run(&self, org_id: OrgId, params: &SyncParams) -> SyncResult<RunOutcome>;
}

/// Wire endpoint material for one organization.
#[derive(Clone)]
pub struct OrgEndpoint {
    pub employer: EmployerIdent,
    pub identity: Option<MtlsIdentity>,
}

/// Resolves per-organization reporting configuration.
#[async_trait]
pub trait OrgDirectory: Send + Sync {
    /// The employer identity and mTLS material of `org_id`, or
    /// [`SyncError::OrgNotConfigured`].
    async fn endpoint(&self, org_id: OrgId) -> SyncResult<OrgEndpoint>;
}

/// Production runner: government consultation feed into the engine.
pub struct EsocialSyncRunner {
    pool: PgPool,
    transport: Arc<dyn TransportClient>,
    directory: Arc<dyn OrgDirectory>,
}

impl EsocialSyncRunner {
    pub fn new(
        pool: PgPool,
        transport: Arc<dyn TransportClient>,
        directory: Arc<dyn OrgDirectory>,
    ) -> Self {
        Self {
            pool,
            transport,
            directory,
        }
    }
}

#[async_trait]
impl SyncRunner for EsocialSyncRunner {
    #[instrument(skip(self, params))]
    async fn run(&self, org_id: OrgId, params: &SyncParams) -> SyncResult<RunOutcome> {
        let started = Instant::now();
        let endpoint = self.directory.endpoint(org_id).await?;
        let period_start = params.period_start.to_string();
        let period_end = params.period_end.to_string();

        let requested = params.ordered_types();
        let mut raw_events = Vec::new();
        let mut type_failures = Vec::new();
        let mut skipped: u64 = 0;

        for event_type in &requested {
            let response = self
                .transport
                .consult_events(
                    &endpoint.employer,
                    event_type.code(),
                    &period_start,
                    &period_end,
                    endpoint.identity.as_ref(),
                )
                .await;
            match response {
                Ok(response) => {
                    let block_count = response.events.len();
                    let mut parsed = Vec::new();
                    for block in &response.events {
                        parsed.extend(parse_lifecycle_events(block, *event_type));
                    }
                    skipped += (block_count.saturating_sub(parsed.len())) as u64;
                    info!(
                        event_type = %event_type,
                        fetched = block_count,
                        parsed = parsed.len(),
                        "event type consulted"
                    );
                    raw_events.extend(parsed);
                }
                Err(e) => {
                    warn!(event_type = %event_type, error = %e, "event type consultation failed");
                    type_failures.push((*event_type, e.to_string()));
                }
            }
        }

        if !requested.is_empty() && type_failures.len() == requested.len() {
            return Err(SyncError::AllTypesFailed {
                detail: type_failures
                    .iter()
                    .map(|(t, e)| format!("{t}: {e}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            });
        }

        let deduped = dedup_events(raw_events);
        audit_raw_events(&self.pool, org_id, &deduped).await?;
        let workers = reconcile(deduped.clone());
        let mut stats = persist_workers(&self.pool, org_id, &workers).await?;
        stats.raw_events_processed = deduped.len() as u64;
        stats.events_skipped = skipped;
        stats.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            org_id = %org_id,
            events = stats.raw_events_processed,
            workers = workers.len(),
            failures = type_failures.len(),
            "synchronization run finished"
        );
        Ok(RunOutcome {
            stats,
            type_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(s: &str) -> Competence {
        Competence::parse(s).unwrap()
    }

    #[test]
    fn test_lifecycle_defaults_cover_all_types() {
        let params = SyncParams::lifecycle(period("2023-01"), period("2023-12"));
        assert_eq!(params.event_types.len(), 5);
    }

    #[test]
    fn test_ordered_types_ignores_request_order() {
        let params = SyncParams {
            period_start: period("2023-01"),
            period_end: period("2023-12"),
            event_types: vec![
                EventType::Termination,
                EventType::Hire,
                EventType::NoBondEnd,
            ],
        };
        assert_eq!(
            params.ordered_types(),
            vec![
                EventType::Hire,
                EventType::Termination,
                EventType::NoBondEnd
            ]
        );
    }

    #[test]
    fn test_outcome_partial_flag() {
        let clean = RunOutcome {
            stats: SyncStats::default(),
            type_failures: vec![],
        };
        assert!(!clean.is_partial());

        let partial = RunOutcome {
            stats: SyncStats::default(),
            type_failures: vec![(EventType::Hire, "timeout".to_string())],
        };
        assert!(partial.is_partial());
    }
}
