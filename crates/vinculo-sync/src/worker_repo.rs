//! Consolidated-worker persistence.
//!
//! One row per (organization, taxpayer id). Writes go through a single
//! upsert on that natural key, so concurrent runs cannot race a
//! check-then-insert; the stored change hash decides whether a write
//! happens at all.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use vinculo_core::OrgId;

use crate::engine::{classify_change, ChangeKind, ConsolidatedWorker};
use crate::error::SyncResult;
use crate::raw::RawLifecycleEvent;
use crate::stats::SyncStats;

/// Database row backing a consolidated worker.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConsolidatedWorkerRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub cpf: String,
    pub name: Option<String>,
    pub registration: Option<String>,
    pub role: Option<String>,
    pub category: Option<String>,
    pub admission_date: Option<NaiveDate>,
    pub termination_date: Option<NaiveDate>,
    pub status: String,
    pub change_hash: String,
    pub event_count: i64,
    pub last_event_type: String,
    pub last_event_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Load one consolidated worker.
pub async fn find_worker(
    pool: &PgPool,
    org_id: OrgId,
    cpf: &str,
) -> SyncResult<Option<ConsolidatedWorkerRow>> {
    Ok(
        sqlx::query_as("SELECT * FROM consolidated_workers WHERE org_id = $1 AND cpf = $2")
            .bind(org_id.as_uuid())
            .bind(cpf)
            .fetch_optional(pool)
            .await?,
    )
}

/// List an organization's consolidated workers, ordered by name.
pub async fn list_workers(
    pool: &PgPool,
    org_id: OrgId,
    limit: i64,
    offset: i64,
) -> SyncResult<Vec<ConsolidatedWorkerRow>> {
    Ok(sqlx::query_as(
        "SELECT * FROM consolidated_workers WHERE org_id = $1 ORDER BY name NULLS LAST LIMIT $2 OFFSET $3",
    )
    .bind(org_id.as_uuid())
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?)
}

/// Stored change hashes for an organization, keyed by taxpayer id.
pub async fn stored_hashes(
    pool: &PgPool,
    org_id: OrgId,
) -> SyncResult<std::collections::HashMap<String, String>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT cpf, change_hash FROM consolidated_workers WHERE org_id = $1")
            .bind(org_id.as_uuid())
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

/// Upsert one consolidated worker on its natural key.
pub async fn upsert_worker(
    pool: &PgPool,
    org_id: OrgId,
    worker: &ConsolidatedWorker,
) -> SyncResult<()> {
    sqlx::query(
        r#"
        INSERT INTO consolidated_workers (
            org_id, cpf, name, registration, role, category,
            admission_date, termination_date, status, change_hash,
            event_count, last_event_type, last_event_date
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (org_id, cpf) DO UPDATE SET
            name = EXCLUDED.name,
            registration = EXCLUDED.registration,
            role = EXCLUDED.role,
            category = EXCLUDED.category,
            admission_date = EXCLUDED.admission_date,
            termination_date = EXCLUDED.termination_date,
            status = EXCLUDED.status,
            change_hash = EXCLUDED.change_hash,
            event_count = EXCLUDED.event_count,
            last_event_type = EXCLUDED.last_event_type,
            last_event_date = EXCLUDED.last_event_date,
            updated_at = NOW()
        "#,
    )
    .bind(org_id.as_uuid())
    .bind(&worker.cpf)
    .bind(&worker.name)
    .bind(&worker.registration)
    .bind(&worker.role)
    .bind(&worker.category)
    .bind(worker.admission_date)
    .bind(worker.termination_date)
    .bind(worker.status.to_string())
    .bind(&worker.change_hash)
    .bind(worker.event_count as i64)
    .bind(worker.last_event_type.code())
    .bind(worker.last_event_date)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist a reconciliation result, writing only workers whose content hash
/// differs from the stored one. Returns the per-kind counters.
pub async fn persist_workers(
    pool: &PgPool,
    org_id: OrgId,
    workers: &[ConsolidatedWorker],
) -> SyncResult<SyncStats> {
    let prior = stored_hashes(pool, org_id).await?;
    let mut stats = SyncStats::default();

    for worker in workers {
        match classify_change(prior.get(&worker.cpf).map(String::as_str), &worker.change_hash) {
            ChangeKind::New => {
                upsert_worker(pool, org_id, worker).await?;
                stats.workers_new += 1;
            }
            ChangeKind::Updated => {
                upsert_worker(pool, org_id, worker).await?;
                stats.workers_updated += 1;
            }
            ChangeKind::Unchanged => {
                stats.workers_unchanged += 1;
            }
        }
    }

    info!(
        org_id = %org_id,
        new = stats.workers_new,
        updated = stats.workers_updated,
        unchanged = stats.workers_unchanged,
        "consolidated workers persisted"
    );
    Ok(stats)
}

/// Append raw lifecycle events to the audit trail. The natural-key conflict
/// target makes re-processing the same stream a no-op.
pub async fn audit_raw_events(
    pool: &PgPool,
    org_id: OrgId,
    events: &[RawLifecycleEvent],
) -> SyncResult<u64> {
    let mut inserted = 0;
    for event in events {
        let result = sqlx::query(
            r#"
            INSERT INTO raw_lifecycle_events (
                org_id, cpf, event_type, event_date, receipt, raw_xml
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (org_id, cpf, event_type, event_date) DO NOTHING
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(&event.cpf)
        .bind(event.event_type.code())
        .bind(event.event_date)
        .bind(&event.receipt)
        .bind(&event.raw_xml)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}
