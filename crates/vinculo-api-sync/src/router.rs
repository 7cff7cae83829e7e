//! Router assembly for the synchronization API.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use vinculo_sync::{OrgDirectory, SyncScheduler};

use crate::handlers;

/// Shared state of the synchronization API.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: SyncScheduler,
    pub directory: Arc<dyn OrgDirectory>,
}

/// Build the synchronization router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orgs/:org_id/sync", post(handlers::trigger_sync))
        .route("/orgs/:org_id/sync/status", get(handlers::sync_status))
        .route("/sync/jobs", get(handlers::list_jobs))
        .route("/sync/jobs/:job_id", get(handlers::get_job))
        .with_state(state)
}
