//! The orchestration coordinator: runs jobs through their stage pipelines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::Event;
use crate::executor::{CallExecutor, CallOptions};
use crate::metrics::DependencySnapshot;
use crate::operation::Operation;
use crate::registry::DependencyRegistry;

use super::handle::{JobHandle, JobState};
use super::job::{
    JobId, JobReport, JobSpec, JobStatus, StageGroup, StageResult, StageSpec, StageStatus,
};

/// Error returned when a job spec cannot be accepted.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("job has no stages")]
    EmptyJob,

    #[error("stage '{stage}': unknown operation '{operation}'")]
    UnknownOperation { stage: String, operation: String },

    #[error("stage '{stage}': unknown dependency '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },
}

/// Builder for a [`Coordinator`].
pub struct CoordinatorBuilder {
    registry: Arc<DependencyRegistry>,
    operations: HashMap<&'static str, Arc<dyn Operation>>,
    max_concurrent_jobs: usize,
    event_capacity: usize,
}

impl CoordinatorBuilder {
    /// Create a builder over the given dependency registry.
    pub fn new(registry: Arc<DependencyRegistry>) -> Self {
        Self {
            registry,
            operations: HashMap::new(),
            max_concurrent_jobs: 8,
            event_capacity: 256,
        }
    }

    /// Register an operation under its own name.
    pub fn operation(mut self, operation: impl Operation + 'static) -> Self {
        let name = operation.name();
        self.operations.insert(name, Arc::new(operation));
        self
    }

    /// Bound the number of jobs running at once; excess jobs stay pending.
    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.max_concurrent_jobs = n;
        self
    }

    /// Capacity of the event broadcast channel.
    pub fn event_capacity(mut self, n: usize) -> Self {
        self.event_capacity = n;
        self
    }

    /// Build the coordinator.
    pub fn build(self) -> Coordinator {
        let (events, _) = broadcast::channel(self.event_capacity);
        Coordinator {
            inner: Arc::new(Inner {
                executor: CallExecutor::new(self.registry),
                operations: self.operations,
                jobs: Mutex::new(HashMap::new()),
                events,
                semaphore: Arc::new(Semaphore::new(self.max_concurrent_jobs)),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

struct Inner {
    executor: CallExecutor,
    operations: HashMap<&'static str, Arc<dyn Operation>>,
    jobs: Mutex<HashMap<JobId, Arc<JobState>>>,
    events: broadcast::Sender<Event>,
    semaphore: Arc<Semaphore>,
    next_id: AtomicU64,
}

/// Dispatches jobs across their stages, each stage going through the call
/// executor against its dependency.
///
/// The coordinator never retries anything itself; retry behavior lives
/// entirely in the executor. Its only aggregation decision is
/// required-versus-optional stage failure.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Start building a coordinator.
    pub fn builder(registry: Arc<DependencyRegistry>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(registry)
    }

    /// Subscribe to the coordinator's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Read-only snapshots of every dependency's counters and state.
    pub async fn snapshot(&self) -> Vec<DependencySnapshot> {
        self.inner.executor.registry().snapshot().await
    }

    /// Validate and accept a job, spawning its pipeline task.
    pub fn submit(&self, spec: JobSpec) -> Result<JobHandle, SubmitError> {
        self.validate(&spec)?;

        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let state = JobState::new(id);
        self.inner
            .jobs
            .lock()
            .expect("jobs lock poisoned")
            .insert(id, state.clone());

        info!(job_id = %id, stages = spec.stages.len(), "job accepted");
        let inner = self.inner.clone();
        let task_state = state.clone();
        tokio::spawn(async move {
            run_job(inner, task_state, spec).await;
        });

        Ok(JobHandle::new(state))
    }

    /// Current report for a job, or `None` if the id is unknown.
    pub fn status(&self, id: JobId) -> Option<JobReport> {
        self.inner
            .jobs
            .lock()
            .expect("jobs lock poisoned")
            .get(&id)
            .map(|state| state.report())
    }

    /// Request cancellation of a job. Returns false for an unknown id.
    /// Idempotent; a finished job is left untouched.
    pub fn cancel(&self, id: JobId) -> bool {
        let state = self
            .inner
            .jobs
            .lock()
            .expect("jobs lock poisoned")
            .get(&id)
            .cloned();
        match state {
            Some(state) => {
                state.cancel();
                true
            }
            None => false,
        }
    }

    fn validate(&self, spec: &JobSpec) -> Result<(), SubmitError> {
        if spec.stages.iter().all(|group| group.stages.is_empty()) {
            return Err(SubmitError::EmptyJob);
        }
        for group in &spec.stages {
            for stage in &group.stages {
                if !self.inner.operations.contains_key(stage.operation.as_str()) {
                    return Err(SubmitError::UnknownOperation {
                        stage: stage.name.clone(),
                        operation: stage.operation.clone(),
                    });
                }
                if !self.inner.executor.registry().contains(&stage.dependency) {
                    return Err(SubmitError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: stage.dependency.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn emit(inner: &Inner, event: Event) {
    // No subscribers is fine.
    let _ = inner.events.send(event);
}

async fn run_job(inner: Arc<Inner>, state: Arc<JobState>, spec: JobSpec) {
    // Wait for a run slot; a job cancelled while queued never starts.
    let _permit = tokio::select! {
        _ = state.cancel_token().cancelled() => {
            finish_job(&inner, &state, JobStatus::Cancelled, &spec.stages, 0);
            return;
        }
        permit = inner.semaphore.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    state.set_status(JobStatus::Running);
    emit(&inner, Event::JobStarted { job_id: state.id() });

    let mut payload = spec.input.clone();
    let mut optional_failed = false;

    for (index, group) in spec.stages.iter().enumerate() {
        if state.cancel_token().is_cancelled() {
            finish_job(&inner, &state, JobStatus::Cancelled, &spec.stages, index);
            return;
        }

        let stage_runs = group
            .stages
            .iter()
            .map(|stage| run_stage(&inner, &state, stage, payload.clone()));
        let results = join_all(stage_runs).await;

        let single = group.stages.len() == 1;
        let mut single_output = None;
        let mut group_outputs = serde_json::Map::new();
        let mut required_failed = false;

        for (stage, result) in group.stages.iter().zip(results) {
            match result.status {
                StageStatus::Success => {
                    if single {
                        single_output = result.output.clone();
                    } else if let Some(output) = &result.output {
                        group_outputs.insert(result.stage.clone(), output.clone());
                    }
                }
                _ => {
                    if stage.required {
                        required_failed = true;
                    } else {
                        optional_failed = true;
                    }
                }
            }
            emit(
                &inner,
                Event::StageFinished {
                    job_id: state.id(),
                    result: result.clone(),
                },
            );
            state.push_result(result);
        }

        if state.cancel_token().is_cancelled() {
            finish_job(&inner, &state, JobStatus::Cancelled, &spec.stages, index + 1);
            return;
        }
        if required_failed {
            finish_job(&inner, &state, JobStatus::Failed, &spec.stages, index + 1);
            return;
        }

        payload = if single {
            single_output.unwrap_or(payload)
        } else {
            serde_json::Value::Object(group_outputs)
        };
    }

    let status = if optional_failed {
        JobStatus::PartialFailure
    } else {
        JobStatus::Completed
    };
    finish_job(&inner, &state, status, &spec.stages, spec.stages.len());
}

/// Record skipped results for every stage from `from_group` on, then set the
/// terminal status.
fn finish_job(
    inner: &Inner,
    state: &Arc<JobState>,
    status: JobStatus,
    groups: &[StageGroup],
    from_group: usize,
) {
    for group in &groups[from_group.min(groups.len())..] {
        for stage in &group.stages {
            let result = StageResult::skipped(stage);
            emit(
                inner,
                Event::StageFinished {
                    job_id: state.id(),
                    result: result.clone(),
                },
            );
            state.push_result(result);
        }
    }
    state.set_status(status);
    emit(
        inner,
        Event::JobFinished {
            job_id: state.id(),
            status,
        },
    );
    info!(job_id = %state.id(), ?status, "job finished");
}

async fn run_stage(
    inner: &Arc<Inner>,
    state: &Arc<JobState>,
    stage: &StageSpec,
    input: serde_json::Value,
) -> StageResult {
    emit(
        inner,
        Event::StageStarted {
            job_id: state.id(),
            stage: stage.name.clone(),
            dependency: stage.dependency.clone(),
        },
    );
    debug!(job_id = %state.id(), stage = %stage.name, dependency = %stage.dependency, "stage started");

    // Operation references were validated at submission.
    let Some(operation) = inner.operations.get(stage.operation.as_str()).cloned() else {
        return StageResult {
            stage: stage.name.clone(),
            dependency: stage.dependency.clone(),
            attempts: 0,
            status: StageStatus::Failed,
            latency: Duration::ZERO,
            error: Some(format!("unknown operation '{}'", stage.operation)),
            output: None,
        };
    };

    let options = CallOptions {
        timeout: stage.timeout_ms.map(Duration::from_millis),
        cancellation: Some(state.cancel_token().child_token()),
        policy: None,
    };

    let attempts = Arc::new(AtomicU32::new(0));
    let attempt_counter = attempts.clone();
    let started = Instant::now();
    let result = inner
        .executor
        .execute_with(&stage.dependency, options, move || {
            attempt_counter.fetch_add(1, Ordering::Relaxed);
            let operation = operation.clone();
            let input = input.clone();
            async move { operation.call(input).await }
        })
        .await;
    let latency = started.elapsed();
    let attempts = attempts.load(Ordering::Relaxed);

    match result {
        Ok(output) => StageResult {
            stage: stage.name.clone(),
            dependency: stage.dependency.clone(),
            attempts,
            status: StageStatus::Success,
            latency,
            error: None,
            output: Some(output),
        },
        Err(err) => {
            warn!(job_id = %state.id(), stage = %stage.name, error = %err, "stage failed");
            StageResult {
                stage: stage.name.clone(),
                dependency: stage.dependency.clone(),
                attempts,
                status: StageStatus::Failed,
                latency,
                error: Some(err.to_string()),
                output: None,
            }
        }
    }
}
