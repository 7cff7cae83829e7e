//! End-to-end tests of the synchronization API over an in-memory scheduler.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use vinculo_api_sync::{router, AppState};
use vinculo_core::OrgId;
use vinculo_sync::{
    EventType, OrgDirectory, OrgEndpoint, RunOutcome, SchedulerConfig, SyncError, SyncParams,
    SyncResult, SyncRunner, SyncScheduler, SyncStats,
};
use vinculo_transport::EmployerIdent;

/// Directory that knows exactly one organization.
struct SingleOrgDirectory {
    known: OrgId,
}

#[async_trait]
impl OrgDirectory for SingleOrgDirectory {
    async fn endpoint(&self, org_id: OrgId) -> SyncResult<OrgEndpoint> {
        if org_id == self.known {
            Ok(OrgEndpoint {
                employer: EmployerIdent::cnpj("11222333000181"),
                identity: None,
            })
        } else {
            Err(SyncError::OrgNotConfigured(org_id.to_string()))
        }
    }
}

/// Runner that answers instantly with a canned outcome.
struct CannedRunner {
    failures: Vec<(EventType, String)>,
    hard_fail: bool,
}

#[async_trait]
impl SyncRunner for CannedRunner {
    async fn run(&self, _org_id: OrgId, _params: &SyncParams) -> SyncResult<RunOutcome> {
        if self.hard_fail {
            return Err(SyncError::AllTypesFailed {
                detail: "service offline".to_string(),
            });
        }
        Ok(RunOutcome {
            stats: SyncStats {
                raw_events_processed: 12,
                workers_new: 2,
                workers_updated: 1,
                workers_unchanged: 4,
                events_skipped: 0,
                duration_ms: 80,
            },
            type_failures: self.failures.clone(),
        })
    }
}

fn state_with(runner: CannedRunner, org: OrgId) -> AppState {
    AppState {
        scheduler: SyncScheduler::new(Arc::new(runner), SchedulerConfig::default()),
        directory: Arc::new(SingleOrgDirectory { known: org }),
    }
}

fn trigger_request(org: OrgId, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/orgs/{org}/sync"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn full_success_answers_200_with_stats() {
    let org = OrgId::new();
    let app = router(state_with(
        CannedRunner {
            failures: vec![],
            hard_fail: false,
        },
        org,
    ));

    let response = app
        .oneshot(trigger_request(org, json!({ "period_start": "2023-01", "period_end": "2023-12" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["stats"]["raw_events_processed"], 12);
    assert_eq!(body["stats"]["workers_new"], 2);
}

#[tokio::test]
async fn partial_success_answers_207_enumerating_failures() {
    let org = OrgId::new();
    let app = router(state_with(
        CannedRunner {
            failures: vec![(EventType::Termination, "timeout".to_string())],
            hard_fail: false,
        },
        org,
    ));

    let response = app
        .oneshot(trigger_request(org, json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    let body = body_json(response).await;
    assert_eq!(body["status"], "partial");
    assert_eq!(body["failed_event_types"][0]["event_type"], "S-2299");
    assert_eq!(body["failed_event_types"][0]["message"], "timeout");
}

#[tokio::test]
async fn unknown_event_type_answers_400() {
    let org = OrgId::new();
    let app = router(state_with(
        CannedRunner {
            failures: vec![],
            hard_fail: false,
        },
        org,
    ));

    let response = app
        .oneshot(trigger_request(org, json!({ "event_types": ["S-9999"] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn unknown_org_answers_404() {
    let app = router(state_with(
        CannedRunner {
            failures: vec![],
            hard_fail: false,
        },
        OrgId::new(),
    ));

    let response = app
        .oneshot(trigger_request(OrgId::new(), json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resync_inside_interval_answers_429_with_next_allowed() {
    let org = OrgId::new();
    let state = state_with(
        CannedRunner {
            failures: vec![],
            hard_fail: false,
        },
        org,
    );
    // Default interval is 30 minutes: a sync 10 minutes ago blocks.
    let last_sync = Utc::now() - Duration::minutes(10);
    state.scheduler.note_sync_completed(org, last_sync);
    let app = router(state);

    let response = app
        .oneshot(trigger_request(org, json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"], "resync_denied");
    let expected = (last_sync + Duration::minutes(30)).to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true);
    let reported = body["next_allowed_at"].as_str().unwrap();
    assert_eq!(reported, expected);
}

#[tokio::test]
async fn forced_resync_bypasses_the_gate() {
    let org = OrgId::new();
    let state = state_with(
        CannedRunner {
            failures: vec![],
            hard_fail: false,
        },
        org,
    );
    state
        .scheduler
        .note_sync_completed(org, Utc::now() - Duration::minutes(10));
    let app = router(state);

    let response = app
        .oneshot(trigger_request(org, json!({ "force_resync": true })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn hard_failure_answers_500() {
    let org = OrgId::new();
    let app = router(state_with(
        CannedRunner {
            failures: vec![],
            hard_fail: true,
        },
        org,
    ));

    let response = app
        .oneshot(trigger_request(org, json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn status_endpoint_reports_last_sync_and_gate() {
    let org = OrgId::new();
    let state = state_with(
        CannedRunner {
            failures: vec![],
            hard_fail: false,
        },
        org,
    );
    let last_sync = Utc::now() - Duration::minutes(5);
    state.scheduler.note_sync_completed(org, last_sync);
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/orgs/{org}/sync/status"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["sync_running"], false);
    assert!(body["last_sync_at"].is_string());
    assert!(body["next_allowed_at"].is_string());
}

#[tokio::test]
async fn job_registry_read_side() {
    let org = OrgId::new();
    let state = state_with(
        CannedRunner {
            failures: vec![],
            hard_fail: false,
        },
        org,
    );
    let app = router(state.clone());

    let response = app
        .clone()
        .oneshot(trigger_request(org, json!({})))
        .await
        .unwrap();
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/sync/jobs/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "completed");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/sync/jobs?status=completed")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], 1);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/sync/jobs/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
