//! Persistence models for events, batches and the audit log.
//!
//! Rows follow the relational schema the core depends on: an `events` table,
//! a `batches` table and an `audit_log` table. Enums are stored as varchar
//! and round-trip through `Display`/`FromStr`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use vinculo_core::validation::{IssueLevel, ValidationIssue};
use vinculo_events::EventType;
use vinculo_transport::{Occurrence, OccurrenceSeverity};

use crate::error::{LifecycleError, LifecycleResult};
use crate::state::{BatchStatus, EventStatus};

/// A persisted error/warning annotation on an event.
///
/// Annotations accumulate across the pipeline: validation warnings at build
/// time, occurrence records from the service, transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAnnotation {
    pub code: String,
    pub description: String,
    /// `"error"` or `"warning"`.
    pub severity: String,
}

impl From<&ValidationIssue> for ErrorAnnotation {
    fn from(issue: &ValidationIssue) -> Self {
        Self {
            code: issue.rule.clone(),
            description: issue.message.clone(),
            severity: match issue.level {
                IssueLevel::Error => "error".to_string(),
                IssueLevel::Warning => "warning".to_string(),
            },
        }
    }
}

impl From<&Occurrence> for ErrorAnnotation {
    fn from(occurrence: &Occurrence) -> Self {
        Self {
            code: occurrence.code.clone(),
            description: occurrence.description.clone(),
            severity: match occurrence.severity {
                OccurrenceSeverity::Error => "error".to_string(),
                OccurrenceSeverity::Warning => "warning".to_string(),
            },
        }
    }
}

/// A persisted government-reporting event.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    /// The 36-character government event identifier (`Id` attribute).
    pub gov_id: String,
    pub event_type: String,
    pub status: String,
    pub raw_xml: Option<String>,
    pub signed_xml: Option<String>,
    pub batch_id: Option<Uuid>,
    pub protocol: Option<String>,
    pub receipt: Option<String>,
    /// JSON list of [`ErrorAnnotation`].
    pub annotations: JsonValue,
    /// Source entity reference (exam, incident, worker or employer-info id).
    pub source_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventRecord {
    /// Parsed status.
    pub fn status(&self) -> LifecycleResult<EventStatus> {
        self.status
            .parse()
            .map_err(|detail| LifecycleError::CorruptRecord { detail })
    }

    /// Parsed event type.
    pub fn event_type(&self) -> LifecycleResult<EventType> {
        self.event_type
            .parse()
            .map_err(|detail| LifecycleError::CorruptRecord { detail })
    }

    /// Parsed annotation list.
    #[must_use]
    pub fn annotations(&self) -> Vec<ErrorAnnotation> {
        serde_json::from_value(self.annotations.clone()).unwrap_or_default()
    }

    /// Insert a new event in `Preparing` state.
    pub async fn create(
        pool: &PgPool,
        org_id: Uuid,
        gov_id: &str,
        event_type: EventType,
        raw_xml: &str,
        source_ref: Option<&str>,
        annotations: &[ErrorAnnotation],
    ) -> LifecycleResult<Self> {
        let row = sqlx::query_as(
            r#"
            INSERT INTO events (org_id, gov_id, event_type, status, raw_xml, source_ref, annotations)
            VALUES ($1, $2, $3, 'preparing', $4, $5, $6)
            ON CONFLICT (org_id, gov_id) DO UPDATE SET updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(org_id)
        .bind(gov_id)
        .bind(event_type.code())
        .bind(raw_xml)
        .bind(source_ref)
        .bind(serde_json::to_value(annotations).unwrap_or(JsonValue::Null))
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    /// Load one event.
    pub async fn find(pool: &PgPool, id: Uuid) -> LifecycleResult<Self> {
        sqlx::query_as("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(LifecycleError::EventNotFound(id))
    }

    /// Load every member of a batch.
    pub async fn find_by_batch(pool: &PgPool, batch_id: Uuid) -> LifecycleResult<Vec<Self>> {
        Ok(
            sqlx::query_as("SELECT * FROM events WHERE batch_id = $1 ORDER BY created_at")
                .bind(batch_id)
                .fetch_all(pool)
                .await?,
        )
    }

    /// Persist a status transition together with its side fields.
    pub async fn apply_transition(
        pool: &PgPool,
        id: Uuid,
        to: EventStatus,
        signed_xml: Option<&str>,
        protocol: Option<&str>,
        receipt: Option<&str>,
        annotations: Option<&[ErrorAnnotation]>,
    ) -> LifecycleResult<Self> {
        let row = sqlx::query_as(
            r#"
            UPDATE events
            SET status = $2,
                signed_xml = COALESCE($3, signed_xml),
                protocol = COALESCE($4, protocol),
                receipt = COALESCE($5, receipt),
                annotations = COALESCE($6, annotations),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to.to_string())
        .bind(signed_xml)
        .bind(protocol)
        .bind(receipt)
        .bind(annotations.map(|a| serde_json::to_value(a).unwrap_or(JsonValue::Null)))
        .fetch_optional(pool)
        .await?
        .ok_or(LifecycleError::EventNotFound(id))?;
        Ok(row)
    }

    /// Attach the event to a batch.
    pub async fn attach_to_batch(pool: &PgPool, id: Uuid, batch_id: Uuid) -> LifecycleResult<()> {
        sqlx::query("UPDATE events SET batch_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(batch_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// A persisted submission batch.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BatchRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub status: String,
    pub protocol: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchRecord {
    /// Parsed status.
    pub fn status(&self) -> LifecycleResult<BatchStatus> {
        self.status
            .parse()
            .map_err(|detail| LifecycleError::CorruptRecord { detail })
    }

    /// Insert a new batch in `Preparing` state.
    pub async fn create(pool: &PgPool, org_id: Uuid) -> LifecycleResult<Self> {
        let row = sqlx::query_as(
            "INSERT INTO batches (org_id, status) VALUES ($1, 'preparing') RETURNING *",
        )
        .bind(org_id)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    /// Load one batch.
    pub async fn find(pool: &PgPool, id: Uuid) -> LifecycleResult<Self> {
        sqlx::query_as("SELECT * FROM batches WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(LifecycleError::BatchNotFound(id))
    }

    /// Store the derived status, and the protocol on first submission.
    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        status: BatchStatus,
        protocol: Option<&str>,
    ) -> LifecycleResult<Self> {
        let row = sqlx::query_as(
            r#"
            UPDATE batches
            SET status = $2,
                protocol = COALESCE($3, protocol),
                sent_at = CASE WHEN $2 = 'sent' AND sent_at IS NULL THEN NOW() ELSE sent_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(protocol)
        .fetch_optional(pool)
        .await?
        .ok_or(LifecycleError::BatchNotFound(id))?;
        Ok(row)
    }
}

/// One row of the operation audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub org_id: Uuid,
    pub operation: String,
    pub status: String,
    pub detail: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Append an entry. Audit failures are logged, never propagated: the
    /// trail must not break the pipeline.
    pub async fn record(
        pool: &PgPool,
        org_id: Uuid,
        operation: &str,
        status: &str,
        detail: JsonValue,
    ) {
        let result = sqlx::query(
            "INSERT INTO audit_log (org_id, operation, status, detail) VALUES ($1, $2, $3, $4)",
        )
        .bind(org_id)
        .bind(operation)
        .bind(status)
        .bind(detail)
        .execute(pool)
        .await;
        if let Err(e) = result {
            tracing::error!(error = %e, operation, "failed to write audit log entry");
        }
    }
}
