//! Bounded-concurrency sync scheduler.
//!
//! Jobs beyond the concurrency cap queue FIFO and start as running slots
//! free up. The registry is in-memory and guarded by a single mutex, since
//! submissions and completions race; jobs are best-effort and lost on
//! process restart. A per-organization resync gate enforces the minimum
//! interval between synchronizations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use vinculo_core::{JobId, OrgId};
use vinculo_events::EventType;

use crate::error::{SyncError, SyncResult};
use crate::runner::{SyncParams, SyncRunner};
use crate::stats::SyncStats;

/// How a job was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Manual,
    Scheduled,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Scheduled => write!(f, "scheduled"),
        }
    }
}

/// Lifecycle of a job inside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One synchronization job.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub id: JobId,
    pub org_id: OrgId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub params: SyncParams,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: Option<SyncStats>,
    /// Event types that failed inside an otherwise successful run.
    pub type_failures: Vec<(EventType, String)>,
    pub error: Option<String>,
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum jobs running at once.
    pub max_concurrent: usize,
    /// Minimum interval between synchronizations of one organization.
    pub resync_interval: Duration,
    /// How long terminal jobs stay in the registry.
    pub retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            resync_interval: Duration::minutes(30),
            retention: Duration::hours(24),
        }
    }
}

/// Aggregate registry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub free_slots: usize,
}

/// Denial issued by the resync gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResyncDenied {
    pub last_sync: DateTime<Utc>,
    /// Exactly `last_sync + resync_interval`.
    pub next_allowed: DateTime<Utc>,
}

struct State {
    jobs: HashMap<JobId, SyncJob>,
    queue: VecDeque<JobId>,
    running: usize,
    last_completed: HashMap<OrgId, DateTime<Utc>>,
}

struct Inner {
    config: SchedulerConfig,
    runner: Arc<dyn SyncRunner>,
    state: Mutex<State>,
}

/// Bounded worker-pool scheduler over an in-memory job registry.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    pub fn new(runner: Arc<dyn SyncRunner>, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                state: Mutex::new(State {
                    jobs: HashMap::new(),
                    queue: VecDeque::new(),
                    running: 0,
                    last_completed: HashMap::new(),
                }),
            }),
        }
    }

    /// Enqueue a job. It starts immediately when a slot is free, otherwise
    /// waits its turn in FIFO order.
    pub fn submit(&self, org_id: OrgId, kind: JobKind, params: SyncParams) -> JobId {
        let job_id = JobId::new();
        {
            let mut state = self.inner.state.lock().expect("scheduler mutex");
            state.jobs.insert(
                job_id,
                SyncJob {
                    id: job_id,
                    org_id,
                    kind,
                    status: JobStatus::Pending,
                    params,
                    queued_at: Utc::now(),
                    started_at: None,
                    finished_at: None,
                    stats: None,
                    type_failures: Vec::new(),
                    error: None,
                },
            );
            state.queue.push_back(job_id);
        }
        info!(job_id = %job_id, org_id = %org_id, kind = %kind, "sync job queued");
        dispatch(&self.inner);
        job_id
    }

    /// Look up a job.
    #[must_use]
    pub fn status(&self, job_id: JobId) -> Option<SyncJob> {
        self.inner
            .state
            .lock()
            .expect("scheduler mutex")
            .jobs
            .get(&job_id)
            .cloned()
    }

    /// List jobs, newest first, optionally filtered.
    #[must_use]
    pub fn list(&self, status: Option<JobStatus>, kind: Option<JobKind>) -> Vec<SyncJob> {
        let state = self.inner.state.lock().expect("scheduler mutex");
        let mut jobs: Vec<SyncJob> = state
            .jobs
            .values()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .filter(|job| kind.map_or(true, |k| job.kind == k))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.queued_at.cmp(&a.queued_at));
        jobs
    }

    /// Cancel a job. Only pending jobs can be cancelled; running jobs run
    /// to completion or failure.
    pub fn cancel(&self, job_id: JobId) -> SyncResult<()> {
        let mut state = self.inner.state.lock().expect("scheduler mutex");
        let job = state
            .jobs
            .get(&job_id)
            .ok_or(SyncError::JobNotFound(job_id))?;
        if job.status != JobStatus::Pending {
            return Err(SyncError::NotCancellable(job_id));
        }
        state.jobs.remove(&job_id);
        state.queue.retain(|id| *id != job_id);
        info!(job_id = %job_id, "pending sync job cancelled");
        Ok(())
    }

    /// Drop terminal jobs older than the retention window. Returns how many
    /// were removed.
    pub fn purge_expired(&self) -> usize {
        let cutoff = Utc::now() - self.inner.config.retention;
        let mut state = self.inner.state.lock().expect("scheduler mutex");
        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            !(job.status.is_terminal()
                && job.finished_at.map_or(false, |finished| finished < cutoff))
        });
        before - state.jobs.len()
    }

    /// Aggregate counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock().expect("scheduler mutex");
        let mut stats = SchedulerStats {
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
            free_slots: 0,
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats.free_slots = self.inner.config.max_concurrent.saturating_sub(state.running);
        stats
    }

    /// Whether any job of `org_id` is currently running.
    #[must_use]
    pub fn is_running(&self, org_id: OrgId) -> bool {
        self.inner
            .state
            .lock()
            .expect("scheduler mutex")
            .jobs
            .values()
            .any(|job| job.org_id == org_id && job.status == JobStatus::Running)
    }

    /// Timestamp of the last completed synchronization of `org_id`.
    #[must_use]
    pub fn last_sync(&self, org_id: OrgId) -> Option<DateTime<Utc>> {
        self.inner
            .state
            .lock()
            .expect("scheduler mutex")
            .last_completed
            .get(&org_id)
            .copied()
    }

    /// When `org_id` may synchronize again without forcing.
    #[must_use]
    pub fn next_allowed(&self, org_id: OrgId) -> Option<DateTime<Utc>> {
        self.last_sync(org_id)
            .map(|last| last + self.inner.config.resync_interval)
    }

    /// The resync gate: a repeat synchronization inside the minimum
    /// interval is denied unless forced. The denial carries the exact
    /// next-permitted instant.
    pub fn check_resync(
        &self,
        org_id: OrgId,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ResyncDenied> {
        if force {
            return Ok(());
        }
        let Some(last_sync) = self.last_sync(org_id) else {
            return Ok(());
        };
        let next_allowed = last_sync + self.inner.config.resync_interval;
        if now < next_allowed {
            return Err(ResyncDenied {
                last_sync,
                next_allowed,
            });
        }
        Ok(())
    }

    /// Wait until a job reaches a terminal state. Returns `None` when the
    /// job is unknown (or was cancelled while waiting). Used by trigger
    /// endpoints that report the run's outcome in the response.
    pub async fn await_job(&self, job_id: JobId) -> Option<SyncJob> {
        loop {
            match self.status(job_id) {
                None => return None,
                Some(job) if job.status.is_terminal() => return Some(job),
                Some(_) => tokio::time::sleep(std::time::Duration::from_millis(50)).await,
            }
        }
    }

    /// Record a completed synchronization for the resync gate.
    pub fn note_sync_completed(&self, org_id: OrgId, at: DateTime<Utc>) {
        self.inner
            .state
            .lock()
            .expect("scheduler mutex")
            .last_completed
            .insert(org_id, at);
    }
}

/// Start queued jobs while slots are free. Spawning happens outside the
/// lock.
fn dispatch(inner: &Arc<Inner>) {
    let mut to_start = Vec::new();
    {
        let mut guard = inner.state.lock().expect("scheduler mutex");
        let state = &mut *guard;
        while state.running < inner.config.max_concurrent {
            let Some(job_id) = state.queue.pop_front() else {
                break;
            };
            let Some(job) = state.jobs.get_mut(&job_id) else {
                continue; // cancelled while queued
            };
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            state.running += 1;
            to_start.push((job_id, job.org_id, job.params.clone()));
        }
    }
    for (job_id, org_id, params) in to_start {
        let inner = inner.clone();
        tokio::spawn(async move {
            run_job(inner, job_id, org_id, params).await;
        });
    }
}

async fn run_job(inner: Arc<Inner>, job_id: JobId, org_id: OrgId, params: SyncParams) {
    let result = inner.runner.run(org_id, &params).await;
    let finished_at = Utc::now();
    {
        let mut guard = inner.state.lock().expect("scheduler mutex");
        let state = &mut *guard;
        state.running = state.running.saturating_sub(1);
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.finished_at = Some(finished_at);
            match result {
                Ok(outcome) => {
                    job.status = JobStatus::Completed;
                    job.stats = Some(outcome.stats);
                    job.type_failures = outcome.type_failures;
                    state.last_completed.insert(org_id, finished_at);
                    info!(job_id = %job_id, org_id = %org_id, "sync job completed");
                }
                Err(e) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                    warn!(job_id = %job_id, org_id = %org_id, error = %e, "sync job failed");
                }
            }
        }
    }
    // A slot freed: admit the next pending job, if any.
    dispatch(&inner);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunOutcome;
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;
    use tokio::sync::Semaphore;
    use vinculo_core::Competence;

    /// Runner that blocks until a permit is released, recording start order.
    struct GatedRunner {
        gate: Arc<Semaphore>,
        started: Mutex<Vec<OrgId>>,
        fail: bool,
    }

    impl GatedRunner {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                gate: Arc::new(Semaphore::new(0)),
                started: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn release(&self, count: usize) {
            self.gate.add_permits(count);
        }
    }

    #[async_trait]
    impl SyncRunner for GatedRunner {
        async fn run(&self, org_id: OrgId, _params: &SyncParams) -> SyncResult<RunOutcome> {
            self.started.lock().unwrap().push(org_id);
            let permit = self.gate.acquire().await.expect("gate open");
            permit.forget();
            if self.fail {
                return Err(SyncError::AllTypesFailed {
                    detail: "induced".to_string(),
                });
            }
            Ok(RunOutcome {
                stats: SyncStats::default(),
                type_failures: vec![],
            })
        }
    }

    fn params() -> SyncParams {
        SyncParams::lifecycle(
            Competence::parse("2023-01").unwrap(),
            Competence::parse("2023-12").unwrap(),
        )
    }

    async fn wait_until(scheduler: &SyncScheduler, check: impl Fn(SchedulerStats) -> bool) {
        for _ in 0..200 {
            if check(scheduler.stats()) {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("condition not reached, stats: {:?}", scheduler.stats());
    }

    #[tokio::test]
    async fn test_capacity_bounds_running_jobs() {
        let runner = GatedRunner::new(false);
        let scheduler = SyncScheduler::new(runner.clone(), SchedulerConfig::default());

        for _ in 0..5 {
            scheduler.submit(OrgId::new(), JobKind::Manual, params());
        }
        wait_until(&scheduler, |s| s.running == 3).await;
        assert_eq!(scheduler.stats().pending, 2);
        assert_eq!(scheduler.stats().free_slots, 0);

        // One slot frees: exactly one pending job is admitted.
        runner.release(1);
        wait_until(&scheduler, |s| s.completed == 1).await;
        wait_until(&scheduler, |s| s.running == 3).await;
        assert_eq!(scheduler.stats().pending, 1);

        runner.release(4);
        wait_until(&scheduler, |s| s.completed == 5).await;
        assert_eq!(scheduler.stats().pending, 0);
        assert_eq!(scheduler.stats().running, 0);
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let runner = GatedRunner::new(false);
        let config = SchedulerConfig {
            max_concurrent: 1,
            ..SchedulerConfig::default()
        };
        let scheduler = SyncScheduler::new(runner.clone(), config);

        let first = OrgId::new();
        let second = OrgId::new();
        let third = OrgId::new();
        scheduler.submit(first, JobKind::Manual, params());
        scheduler.submit(second, JobKind::Manual, params());
        scheduler.submit(third, JobKind::Manual, params());

        wait_until(&scheduler, |s| s.running == 1).await;
        runner.release(1);
        wait_until(&scheduler, |s| s.completed == 1).await;
        runner.release(1);
        wait_until(&scheduler, |s| s.completed == 2).await;
        runner.release(1);
        wait_until(&scheduler, |s| s.completed == 3).await;

        let order = runner.started.lock().unwrap().clone();
        assert_eq!(order, vec![first, second, third]);
    }

    #[tokio::test]
    async fn test_cancel_pending_only() {
        let runner = GatedRunner::new(false);
        let config = SchedulerConfig {
            max_concurrent: 1,
            ..SchedulerConfig::default()
        };
        let scheduler = SyncScheduler::new(runner.clone(), config);

        let running = scheduler.submit(OrgId::new(), JobKind::Manual, params());
        let pending = scheduler.submit(OrgId::new(), JobKind::Manual, params());
        wait_until(&scheduler, |s| s.running == 1).await;

        scheduler.cancel(pending).unwrap();
        assert!(scheduler.status(pending).is_none());

        assert!(matches!(
            scheduler.cancel(running),
            Err(SyncError::NotCancellable(_))
        ));
        assert!(matches!(
            scheduler.cancel(JobId::new()),
            Err(SyncError::JobNotFound(_))
        ));

        runner.release(1);
        wait_until(&scheduler, |s| s.completed == 1).await;
    }

    #[tokio::test]
    async fn test_failed_job_frees_slot_and_records_error() {
        let runner = GatedRunner::new(true);
        let config = SchedulerConfig {
            max_concurrent: 1,
            ..SchedulerConfig::default()
        };
        let scheduler = SyncScheduler::new(runner.clone(), config);

        let org_id = OrgId::new();
        let failing = scheduler.submit(org_id, JobKind::Scheduled, params());
        let queued = scheduler.submit(OrgId::new(), JobKind::Manual, params());
        runner.release(2);
        wait_until(&scheduler, |s| s.failed == 2).await;

        let job = scheduler.status(failing).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("induced"));
        assert!(scheduler.status(queued).is_some());

        // A failed run never arms the resync gate.
        assert!(scheduler.last_sync(org_id).is_none());
    }

    #[tokio::test]
    async fn test_completed_job_arms_resync_gate() {
        let runner = GatedRunner::new(false);
        let scheduler = SyncScheduler::new(runner.clone(), SchedulerConfig::default());
        let org_id = OrgId::new();

        scheduler.submit(org_id, JobKind::Manual, params());
        runner.release(1);
        wait_until(&scheduler, |s| s.completed == 1).await;

        assert!(scheduler.last_sync(org_id).is_some());
        assert!(scheduler.next_allowed(org_id).is_some());
    }

    #[tokio::test]
    async fn test_resync_gate_denies_inside_interval() {
        let runner = GatedRunner::new(false);
        let scheduler = SyncScheduler::new(runner, SchedulerConfig::default());
        let org_id = OrgId::new();
        let first_sync = Utc::now();
        scheduler.note_sync_completed(org_id, first_sync);

        // Ten minutes later, inside the 30-minute window.
        let denial = scheduler
            .check_resync(org_id, false, first_sync + Duration::minutes(10))
            .unwrap_err();
        assert_eq!(denial.last_sync, first_sync);
        assert_eq!(denial.next_allowed, first_sync + Duration::minutes(30));

        // Forcing bypasses the gate.
        assert!(scheduler
            .check_resync(org_id, true, first_sync + Duration::minutes(10))
            .is_ok());

        // Past the window the gate opens.
        assert!(scheduler
            .check_resync(org_id, false, first_sync + Duration::minutes(31))
            .is_ok());

        // An organization never synced is always allowed.
        assert!(scheduler.check_resync(OrgId::new(), false, Utc::now()).is_ok());
    }

    #[tokio::test]
    async fn test_purge_drops_old_terminal_jobs() {
        let runner = GatedRunner::new(false);
        let config = SchedulerConfig {
            retention: Duration::zero(),
            ..SchedulerConfig::default()
        };
        let scheduler = SyncScheduler::new(runner.clone(), config);

        let job_id = scheduler.submit(OrgId::new(), JobKind::Manual, params());
        runner.release(1);
        wait_until(&scheduler, |s| s.completed == 1).await;

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(scheduler.purge_expired(), 1);
        assert!(scheduler.status(job_id).is_none());
    }

    #[tokio::test]
    async fn test_one_org_failure_never_blocks_others() {
        let runner = GatedRunner::new(true);
        let scheduler = SyncScheduler::new(runner.clone(), SchedulerConfig::default());

        let jobs: Vec<JobId> = (0..3)
            .map(|_| scheduler.submit(OrgId::new(), JobKind::Scheduled, params()))
            .collect();
        runner.release(3);
        wait_until(&scheduler, |s| s.failed == 3).await;

        for job_id in jobs {
            assert_eq!(scheduler.status(job_id).unwrap().status, JobStatus::Failed);
        }
    }
}
