//! Lifecycle orchestration.
//!
//! Drives one event through build -> sign -> submit -> track, persisting
//! every transition and halting automatic progression on the first failure.
//! There are no automatic retries anywhere in this module: re-submission is
//! an explicit external action that re-enters the pipeline at `Preparing`.

use chrono::Utc;
use rand::Rng;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use vinculo_core::OrgId;
use vinculo_events::{EventBuilder, EventPayload, OrgContext};
use vinculo_signer::SignatureService;
use vinculo_transport::{
    BatchSituation, EmployerIdent, EventEnvelope, MtlsIdentity, QueryResponse, TransportClient,
};

use crate::error::{LifecycleError, LifecycleResult};
use crate::model::{AuditLogEntry, BatchRecord, ErrorAnnotation, EventRecord};
use crate::state::{aggregate_batch_status, BatchStatus, EventStatus};

/// Orchestrates the event pipeline against injected collaborators.
///
/// The pool and clients are long-lived and injected once; operations never
/// construct their own.
pub struct LifecycleManager {
    pool: PgPool,
    builder: EventBuilder,
    signature: Arc<SignatureService>,
    transport: Arc<dyn TransportClient>,
}

impl LifecycleManager {
    pub fn new(
        pool: PgPool,
        signature: Arc<SignatureService>,
        transport: Arc<dyn TransportClient>,
    ) -> Self {
        Self {
            pool,
            builder: EventBuilder::new(),
            signature,
            transport,
        }
    }

    /// Build an event payload and persist it in `Preparing` state.
    ///
    /// Warning-level findings are stored as annotations; error-level
    /// findings fail the operation and nothing is persisted.
    #[instrument(skip(self, ctx, payload))]
    pub async fn prepare_event(
        &self,
        org_id: OrgId,
        ctx: &OrgContext,
        payload: &EventPayload,
        source_ref: Option<&str>,
        prior_receipt: Option<&str>,
    ) -> LifecycleResult<EventRecord> {
        let built = match self.builder.build(payload, ctx, prior_receipt) {
            Ok(built) => built,
            Err(e) => {
                AuditLogEntry::record(
                    &self.pool,
                    *org_id.as_uuid(),
                    "prepare_event",
                    "error",
                    serde_json::json!({ "event_type": payload.event_type().code(), "error": e.to_string() }),
                )
                .await;
                return Err(e.into());
            }
        };

        let annotations: Vec<ErrorAnnotation> =
            built.warnings.iter().map(ErrorAnnotation::from).collect();
        let record = EventRecord::create(
            &self.pool,
            *org_id.as_uuid(),
            &built.event_id,
            built.event_type,
            &built.xml,
            source_ref,
            &annotations,
        )
        .await?;

        AuditLogEntry::record(
            &self.pool,
            *org_id.as_uuid(),
            "prepare_event",
            "ok",
            serde_json::json!({ "event_id": record.id, "gov_id": built.event_id }),
        )
        .await;
        info!(event_id = %record.id, gov_id = %built.event_id, "event prepared");
        Ok(record)
    }

    /// Sign a prepared event: `Preparing -> Signed`, or `-> Error` when the
    /// signature service fails.
    #[instrument(skip(self, secret))]
    pub async fn sign_event(
        &self,
        event_id: Uuid,
        secret: Option<&str>,
    ) -> LifecycleResult<EventRecord> {
        let record = EventRecord::find(&self.pool, event_id).await?;
        let status = record.status()?;
        self.ensure_transition(&record, status, EventStatus::Signed)?;

        let raw_xml = record
            .raw_xml
            .as_deref()
            .ok_or_else(|| LifecycleError::CorruptRecord {
                detail: format!("event {event_id} has no raw payload"),
            })?;
        let event_type = record.event_type()?;
        let org_id = OrgId::from_uuid(record.org_id);

        match self
            .signature
            .sign_event(org_id, event_type, raw_xml, secret)
            .await
        {
            Ok(signed) => {
                let updated = EventRecord::apply_transition(
                    &self.pool,
                    event_id,
                    EventStatus::Signed,
                    Some(signed.xml.as_str()),
                    None,
                    None,
                    None,
                )
                .await?;
                AuditLogEntry::record(
                    &self.pool,
                    record.org_id,
                    "sign_event",
                    "ok",
                    serde_json::json!({ "event_id": event_id, "certificate": signed.certificate_subject }),
                )
                .await;
                Ok(updated)
            }
            Err(e) => {
                let mut annotations = record.annotations();
                annotations.push(ErrorAnnotation {
                    code: e.error_code().to_string(),
                    description: e.to_string(),
                    severity: "error".to_string(),
                });
                EventRecord::apply_transition(
                    &self.pool,
                    event_id,
                    EventStatus::Error,
                    None,
                    None,
                    None,
                    Some(&annotations),
                )
                .await?;
                AuditLogEntry::record(
                    &self.pool,
                    record.org_id,
                    "sign_event",
                    "error",
                    serde_json::json!({ "event_id": event_id, "error": e.to_string() }),
                )
                .await;
                warn!(event_id = %event_id, error = %e, "signing failed, event halted");
                Err(e.into())
            }
        }
    }

    /// Group signed events into a new batch.
    pub async fn create_batch(
        &self,
        org_id: OrgId,
        event_ids: &[Uuid],
    ) -> LifecycleResult<BatchRecord> {
        if event_ids.is_empty() {
            return Err(LifecycleError::EmptyBatch);
        }
        for &event_id in event_ids {
            let record = EventRecord::find(&self.pool, event_id).await?;
            let status = record.status()?;
            if status != EventStatus::Signed {
                return Err(LifecycleError::WrongStatus {
                    event_id,
                    expected: EventStatus::Signed,
                    actual: status,
                });
            }
        }
        let batch = BatchRecord::create(&self.pool, *org_id.as_uuid()).await?;
        for &event_id in event_ids {
            EventRecord::attach_to_batch(&self.pool, event_id, batch.id).await?;
        }
        info!(batch_id = %batch.id, members = event_ids.len(), "batch created");
        Ok(batch)
    }

    /// Submit a batch: members `Signed -> Sent` on acceptance, `-> Error`
    /// on transport or business failure.
    #[instrument(skip(self, employer, identity))]
    pub async fn submit_batch(
        &self,
        batch_id: Uuid,
        employer: &EmployerIdent,
        identity: Option<&MtlsIdentity>,
    ) -> LifecycleResult<BatchRecord> {
        let batch = BatchRecord::find(&self.pool, batch_id).await?;
        let members = EventRecord::find_by_batch(&self.pool, batch_id).await?;
        if members.is_empty() {
            return Err(LifecycleError::EmptyBatch);
        }

        let mut envelopes = Vec::with_capacity(members.len());
        for member in &members {
            let status = member.status()?;
            let signed_xml = member.signed_xml.as_deref().ok_or(LifecycleError::WrongStatus {
                event_id: member.id,
                expected: EventStatus::Signed,
                actual: status,
            })?;
            envelopes.push(EventEnvelope {
                event_id: member.gov_id.clone(),
                signed_xml: signed_xml.to_string(),
            });
        }

        let response = match self
            .transport
            .submit_batch(employer, &envelopes, identity)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let annotation = ErrorAnnotation {
                    code: e.error_code().to_string(),
                    description: e.to_string(),
                    severity: "error".to_string(),
                };
                self.fail_members(&members, std::slice::from_ref(&annotation))
                    .await?;
                BatchRecord::update_status(&self.pool, batch_id, BatchStatus::Error, None).await?;
                AuditLogEntry::record(
                    &self.pool,
                    batch.org_id,
                    "submit_batch",
                    "error",
                    serde_json::json!({ "batch_id": batch_id, "error": e.to_string() }),
                )
                .await;
                return Err(e.into());
            }
        };

        match response.into_protocol() {
            Ok(protocol) => {
                for member in &members {
                    EventRecord::apply_transition(
                        &self.pool,
                        member.id,
                        EventStatus::Sent,
                        None,
                        Some(protocol.as_str()),
                        None,
                        None,
                    )
                    .await?;
                }
                let updated = BatchRecord::update_status(
                    &self.pool,
                    batch_id,
                    BatchStatus::Sent,
                    Some(protocol.as_str()),
                )
                .await?;
                AuditLogEntry::record(
                    &self.pool,
                    batch.org_id,
                    "submit_batch",
                    "ok",
                    serde_json::json!({ "batch_id": batch_id, "protocol": protocol }),
                )
                .await;
                info!(batch_id = %batch_id, protocol = %protocol, "batch submitted");
                Ok(updated)
            }
            Err(business) => {
                let annotations: Vec<ErrorAnnotation> =
                    business.occurrences.iter().map(ErrorAnnotation::from).collect();
                self.fail_members(&members, &annotations).await?;
                BatchRecord::update_status(&self.pool, batch_id, BatchStatus::Error, None).await?;
                AuditLogEntry::record(
                    &self.pool,
                    batch.org_id,
                    "submit_batch",
                    "refused",
                    serde_json::json!({ "batch_id": batch_id, "code": business.code }),
                )
                .await;
                Err(business.into())
            }
        }
    }

    /// Query the submitted batch and map the answer onto member statuses.
    #[instrument(skip(self, employer, identity))]
    pub async fn refresh_batch(
        &self,
        batch_id: Uuid,
        employer: &EmployerIdent,
        identity: Option<&MtlsIdentity>,
    ) -> LifecycleResult<BatchRecord> {
        let batch = BatchRecord::find(&self.pool, batch_id).await?;
        let protocol = batch
            .protocol
            .clone()
            .ok_or(LifecycleError::BatchNotSubmitted(batch_id))?;

        let response = self
            .transport
            .query_batch(employer, &protocol, identity)
            .await?;
        let members = EventRecord::find_by_batch(&self.pool, batch_id).await?;

        for update in plan_refresh(&members, &response) {
            EventRecord::apply_transition(
                &self.pool,
                update.event_id,
                update.to,
                None,
                None,
                update.receipt.as_deref(),
                if update.annotations.is_empty() {
                    None
                } else {
                    Some(&update.annotations)
                },
            )
            .await?;
        }

        let members = EventRecord::find_by_batch(&self.pool, batch_id).await?;
        let statuses: Vec<EventStatus> = members
            .iter()
            .map(EventRecord::status)
            .collect::<LifecycleResult<_>>()?;
        let derived = aggregate_batch_status(&statuses);
        let updated = BatchRecord::update_status(&self.pool, batch_id, derived, None).await?;
        info!(batch_id = %batch_id, status = %derived, "batch refreshed");
        Ok(updated)
    }

    /// Clone a failed event into a fresh `Preparing` row with a new
    /// government identifier. The failed row keeps its terminal state; the
    /// clone re-enters the pipeline from the start.
    pub async fn reset_for_resubmission(&self, event_id: Uuid) -> LifecycleResult<EventRecord> {
        let record = EventRecord::find(&self.pool, event_id).await?;
        let status = record.status()?;
        if !matches!(status, EventStatus::Error | EventStatus::Rejected) {
            return Err(LifecycleError::WrongStatus {
                event_id,
                expected: EventStatus::Error,
                actual: status,
            });
        }
        let raw_xml = record
            .raw_xml
            .as_deref()
            .ok_or_else(|| LifecycleError::CorruptRecord {
                detail: format!("event {event_id} has no raw payload"),
            })?;

        let new_gov_id = regenerate_gov_id(&record.gov_id);
        let new_raw = raw_xml.replace(&record.gov_id, &new_gov_id);
        let clone = EventRecord::create(
            &self.pool,
            record.org_id,
            &new_gov_id,
            record.event_type()?,
            &new_raw,
            record.source_ref.as_deref(),
            &[],
        )
        .await?;
        AuditLogEntry::record(
            &self.pool,
            record.org_id,
            "reset_for_resubmission",
            "ok",
            serde_json::json!({ "failed_event": event_id, "new_event": clone.id }),
        )
        .await;
        Ok(clone)
    }

    fn ensure_transition(
        &self,
        record: &EventRecord,
        from: EventStatus,
        to: EventStatus,
    ) -> LifecycleResult<()> {
        if !from.can_transition(to) {
            return Err(LifecycleError::InvalidTransition {
                event_id: record.id,
                from,
                to,
            });
        }
        Ok(())
    }

    async fn fail_members(
        &self,
        members: &[EventRecord],
        annotations: &[ErrorAnnotation],
    ) -> LifecycleResult<()> {
        for member in members {
            let mut combined = member.annotations();
            combined.extend_from_slice(annotations);
            EventRecord::apply_transition(
                &self.pool,
                member.id,
                EventStatus::Error,
                None,
                None,
                None,
                Some(&combined),
            )
            .await?;
        }
        Ok(())
    }
}

/// One planned member transition derived from a batch status answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUpdate {
    pub event_id: Uuid,
    pub to: EventStatus,
    pub receipt: Option<String>,
    pub annotations: Vec<ErrorAnnotation>,
}

/// Map a query answer onto member transitions.
///
/// Only members currently `Sent` move. Per-event results are matched by the
/// government identifier; when the service gives no per-event detail, a
/// fully processed batch promotes every pending member and an errored batch
/// fails them.
#[must_use]
pub fn plan_refresh(members: &[EventRecord], response: &QueryResponse) -> Vec<MemberUpdate> {
    if response.situation == BatchSituation::Processing {
        return Vec::new();
    }

    let mut updates = Vec::new();
    for member in members {
        if member.status().ok() != Some(EventStatus::Sent) {
            continue;
        }
        let result = response
            .event_results
            .iter()
            .find(|r| r.event_id == member.gov_id);
        match result {
            Some(result) if result.processed() => updates.push(MemberUpdate {
                event_id: member.id,
                to: EventStatus::Processed,
                receipt: result.receipt.clone(),
                annotations: Vec::new(),
            }),
            Some(result) => updates.push(MemberUpdate {
                event_id: member.id,
                to: EventStatus::Rejected,
                receipt: None,
                annotations: result.occurrences.iter().map(ErrorAnnotation::from).collect(),
            }),
            None => match response.situation {
                BatchSituation::Processed if response.error_count == 0 => {
                    updates.push(MemberUpdate {
                        event_id: member.id,
                        to: EventStatus::Processed,
                        receipt: None,
                        annotations: Vec::new(),
                    });
                }
                BatchSituation::Error => updates.push(MemberUpdate {
                    event_id: member.id,
                    to: EventStatus::Error,
                    receipt: None,
                    annotations: vec![ErrorAnnotation {
                        code: "BATCH_ERROR".to_string(),
                        description: "batch failed processing without per-event detail"
                            .to_string(),
                        severity: "error".to_string(),
                    }],
                }),
                // Processed with errors but no detail for this member:
                // leave it pending rather than guess.
                _ => {}
            },
        }
    }
    updates
}

/// Derive a fresh government identifier for a resubmission clone, keeping
/// the `ID1` + employer prefix and renewing timestamp and sequence.
fn regenerate_gov_id(gov_id: &str) -> String {
    let prefix: String = gov_id.chars().take(17).collect();
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let sequence: u32 = rand::thread_rng().gen_range(1..=99_999);
    format!("{prefix}{timestamp}{sequence:05}")
}
