//! Synchronization API handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Datelike, Utc};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use vinculo_core::{Competence, JobId, OrgId};
use vinculo_events::EventType;
use vinculo_sync::{JobKind, JobStatus, SyncError, SyncParams};

use crate::error::{ApiError, ApiResult};
use crate::models::{
    EventTypeFailure, JobResponse, ListJobsQuery, ListJobsResponse, SyncRequest,
    SyncStatusResponse, SyncTriggerResponse,
};
use crate::router::AppState;

/// `POST /orgs/{org_id}/sync` - trigger a synchronization and report its
/// outcome: 200 full success, 207 partial success enumerating the failed
/// event types.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Json(request): Json<SyncRequest>,
) -> ApiResult<Response> {
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    let params = build_params(&request)?;
    let org_id = OrgId::from_uuid(org_id);
    ensure_org_configured(&state, org_id).await?;

    if let Err(denial) = state
        .scheduler
        .check_resync(org_id, request.force_resync, Utc::now())
    {
        return Err(ApiError::ResyncDenied { denial });
    }

    let job_id = state.scheduler.submit(org_id, JobKind::Manual, params);
    info!(org_id = %org_id, job_id = %job_id, "synchronization triggered");
    let job = state
        .scheduler
        .await_job(job_id)
        .await
        .ok_or_else(|| ApiError::Internal("sync job vanished from the registry".to_string()))?;

    match job.status {
        JobStatus::Completed if job.type_failures.is_empty() => {
            let body = SyncTriggerResponse {
                job_id: *job.id.as_uuid(),
                status: "completed".to_string(),
                stats: job.stats.map(Into::into),
                failed_event_types: Vec::new(),
            };
            Ok((StatusCode::OK, Json(body)).into_response())
        }
        JobStatus::Completed => {
            let body = SyncTriggerResponse {
                job_id: *job.id.as_uuid(),
                status: "partial".to_string(),
                stats: job.stats.map(Into::into),
                failed_event_types: job
                    .type_failures
                    .into_iter()
                    .map(|(event_type, message)| EventTypeFailure {
                        event_type: event_type.code().to_string(),
                        message,
                    })
                    .collect(),
            };
            Ok((StatusCode::MULTI_STATUS, Json(body)).into_response())
        }
        _ => Err(ApiError::Internal(
            job.error
                .unwrap_or_else(|| "synchronization failed".to_string()),
        )),
    }
}

/// `GET /orgs/{org_id}/sync/status` - last sync, whether one is running,
/// and the next permitted resync time.
pub async fn sync_status(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<SyncStatusResponse>> {
    let org = OrgId::from_uuid(org_id);
    ensure_org_configured(&state, org).await?;
    Ok(Json(SyncStatusResponse {
        org_id,
        last_sync_at: state.scheduler.last_sync(org),
        sync_running: state.scheduler.is_running(org),
        next_allowed_at: state.scheduler.next_allowed(org),
    }))
}

/// `GET /sync/jobs/{job_id}` - one job from the registry.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    state
        .scheduler
        .status(JobId::from_uuid(job_id))
        .map(|job| Json(JobResponse::from(job)))
        .ok_or(ApiError::JobNotFound(job_id))
}

/// `GET /sync/jobs` - list jobs, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<ListJobsResponse>> {
    let status = query
        .status
        .as_deref()
        .map(parse_job_status)
        .transpose()?;
    let kind = query.kind.as_deref().map(parse_job_kind).transpose()?;
    let limit = query.limit.unwrap_or(50).min(100);

    let jobs: Vec<JobResponse> = state
        .scheduler
        .list(status, kind)
        .into_iter()
        .take(limit)
        .map(JobResponse::from)
        .collect();
    let total = jobs.len();
    Ok(Json(ListJobsResponse { jobs, total }))
}

async fn ensure_org_configured(state: &AppState, org_id: OrgId) -> ApiResult<()> {
    match state.directory.endpoint(org_id).await {
        Ok(_) => Ok(()),
        Err(SyncError::OrgNotConfigured(_)) => Err(ApiError::OrgNotFound(*org_id.as_uuid())),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

fn build_params(request: &SyncRequest) -> ApiResult<SyncParams> {
    let period_end = match &request.period_end {
        Some(raw) => Competence::parse(raw)
            .map_err(|e| ApiError::Validation(format!("period_end: {e}")))?,
        None => current_competence()?,
    };
    let period_start = match &request.period_start {
        Some(raw) => Competence::parse(raw)
            .map_err(|e| ApiError::Validation(format!("period_start: {e}")))?,
        None => year_before(period_end)?,
    };
    if period_start > period_end {
        return Err(ApiError::Validation(
            "period_start must not be after period_end".to_string(),
        ));
    }

    let event_types = if request.event_types.is_empty() {
        EventType::LIFECYCLE.to_vec()
    } else {
        let mut types = Vec::with_capacity(request.event_types.len());
        for raw in &request.event_types {
            let event_type: EventType = raw
                .parse()
                .map_err(|e: String| ApiError::Validation(e))?;
            if !event_type.is_lifecycle() {
                return Err(ApiError::Validation(format!(
                    "{raw} is not a worker-lifecycle event type"
                )));
            }
            types.push(event_type);
        }
        types
    };

    Ok(SyncParams {
        period_start,
        period_end,
        event_types,
    })
}

fn current_competence() -> ApiResult<Competence> {
    let today = Utc::now().date_naive();
    Competence::new(today.year() as u16, today.month() as u8)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn year_before(period: Competence) -> ApiResult<Competence> {
    Competence::new(period.year().saturating_sub(1), period.month())
        .map_err(|e| ApiError::Validation(format!("derived period_start: {e}")))
}


fn parse_job_status(raw: &str) -> ApiResult<JobStatus> {
    match raw {
        "pending" => Ok(JobStatus::Pending),
        "running" => Ok(JobStatus::Running),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        other => Err(ApiError::Validation(format!("unknown job status: {other}"))),
    }
}

fn parse_job_kind(raw: &str) -> ApiResult<JobKind> {
    match raw {
        "manual" => Ok(JobKind::Manual),
        "scheduled" => Ok(JobKind::Scheduled),
        other => Err(ApiError::Validation(format!("unknown job kind: {other}"))),
    }
}
