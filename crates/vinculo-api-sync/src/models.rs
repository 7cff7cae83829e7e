//! Request and response models for the synchronization API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use vinculo_sync::{SyncJob, SyncStats};

/// Run statistics as reported over HTTP.
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncStatsDto {
    pub raw_events_processed: u64,
    pub workers_new: u64,
    pub workers_updated: u64,
    pub workers_unchanged: u64,
    pub events_skipped: u64,
    pub duration_ms: u64,
}

impl From<SyncStats> for SyncStatsDto {
    fn from(stats: SyncStats) -> Self {
        Self {
            raw_events_processed: stats.raw_events_processed,
            workers_new: stats.workers_new,
            workers_updated: stats.workers_updated,
            workers_unchanged: stats.workers_unchanged,
            events_skipped: stats.events_skipped,
            duration_ms: stats.duration_ms,
        }
    }
}

/// Request to trigger a synchronization.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SyncRequest {
    /// Start of the reporting period, `YYYY-MM`. Defaults to twelve months
    /// before `period_end`.
    pub period_start: Option<String>,
    /// End of the reporting period, `YYYY-MM`. Defaults to the current
    /// month.
    pub period_end: Option<String>,
    /// Bypass the minimum resync interval.
    #[serde(default)]
    pub force_resync: bool,
    /// Lifecycle event types to fetch; empty means all of them.
    #[serde(default)]
    #[validate(length(max = 5, message = "at most five event types"))]
    pub event_types: Vec<String>,
}

/// Per-event-type failure inside a partially successful run.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventTypeFailure {
    pub event_type: String,
    pub message: String,
}

/// Response of the trigger endpoint (200 full success, 207 partial).
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncTriggerResponse {
    pub job_id: Uuid,
    pub status: String,
    pub stats: Option<SyncStatsDto>,
    /// Present and non-empty only on partial success.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_event_types: Vec<EventTypeFailure>,
}

/// Read-only synchronization status of one organization.
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncStatusResponse {
    pub org_id: Uuid,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_running: bool,
    pub next_allowed_at: Option<DateTime<Utc>>,
}

/// One job as reported by the registry read side.
#[derive(Debug, Serialize, ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub org_id: Uuid,
    pub kind: String,
    pub status: String,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: Option<SyncStatsDto>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_event_types: Vec<EventTypeFailure>,
    pub error: Option<String>,
}

impl From<SyncJob> for JobResponse {
    fn from(job: SyncJob) -> Self {
        Self {
            id: *job.id.as_uuid(),
            org_id: *job.org_id.as_uuid(),
            kind: job.kind.to_string(),
            status: job.status.to_string(),
            queued_at: job.queued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            stats: job.stats.map(SyncStatsDto::from),
            failed_event_types: job
                .type_failures
                .into_iter()
                .map(|(event_type, message)| EventTypeFailure {
                    event_type: event_type.code().to_string(),
                    message,
                })
                .collect(),
            error: job.error,
        }
    }
}

/// Query parameters for listing jobs.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListJobsQuery {
    /// Filter by job status (`pending`, `running`, `completed`, `failed`).
    pub status: Option<String>,
    /// Filter by job kind (`manual`, `scheduled`).
    pub kind: Option<String>,
    /// Maximum entries returned (capped at 100).
    pub limit: Option<usize>,
}

/// Response for listing jobs.
#[derive(Debug, Serialize, ToSchema)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}
