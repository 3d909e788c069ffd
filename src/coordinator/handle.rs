//! Shared job state and the handle returned by `submit`.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::job::{JobId, JobReport, JobStatus, StageResult};

/// Live state of one job, shared between the coordinator task that runs it
/// and any handles observing it.
pub(crate) struct JobState {
    id: JobId,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    status: watch::Sender<JobStatus>,
    results: Mutex<Vec<StageResult>>,
}

impl JobState {
    pub(crate) fn new(id: JobId) -> Arc<Self> {
        let (status, _) = watch::channel(JobStatus::Pending);
        Arc::new(Self {
            id,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            status,
            results: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    pub(crate) fn set_status(&self, status: JobStatus) {
        self.status.send_replace(status);
    }

    pub(crate) fn push_result(&self, result: StageResult) {
        self.results
            .lock()
            .expect("job results lock poisoned")
            .push(result);
    }

    /// Request cancellation. A no-op once the job has finished: the token
    /// fires but nothing is listening, and recorded results are untouched.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn report(&self) -> JobReport {
        JobReport {
            id: self.id,
            status: self.status(),
            created_at: self.created_at,
            stages: self
                .results
                .lock()
                .expect("job results lock poisoned")
                .clone(),
        }
    }

    pub(crate) async fn wait(&self) -> JobReport {
        let mut rx = self.status.subscribe();
        loop {
            if rx.borrow_and_update().is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.report()
    }
}

/// Handle for polling, awaiting and cancelling a submitted job.
#[derive(Clone)]
pub struct JobHandle {
    state: Arc<JobState>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

impl JobHandle {
    pub(crate) fn new(state: Arc<JobState>) -> Self {
        Self { state }
    }

    /// The job's identifier.
    pub fn id(&self) -> JobId {
        self.state.id()
    }

    /// Current status.
    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    /// Current status plus every stage result recorded so far.
    pub fn report(&self) -> JobReport {
        self.state.report()
    }

    /// Request cancellation. Idempotent; cancelling a finished job changes
    /// nothing.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Wait for the job to reach a terminal status and return its report.
    pub async fn wait(&self) -> JobReport {
        self.state.wait().await
    }
}
