//! Job and stage types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unique identifier for a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One pipeline stage: a named call against one dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name, unique within the job.
    pub name: String,
    /// Dependency the call is accounted against.
    pub dependency: String,
    /// Registered operation to invoke.
    pub operation: String,
    /// A required stage's failure fails the job; an optional stage's
    /// failure is recorded and execution continues.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Optional deadline for this stage's whole retry loop.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_required() -> bool {
    true
}

impl StageSpec {
    /// Create a required stage.
    pub fn new(
        name: impl Into<String>,
        dependency: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            dependency: dependency.into(),
            operation: operation.into(),
            required: true,
            timeout_ms: None,
        }
    }

    /// Mark this stage optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Set a deadline for this stage.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

/// Stages that run together. A group of one is a sequential stage; groups
/// themselves always run in declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageGroup {
    pub stages: Vec<StageSpec>,
}

/// Everything needed to run one job: the initial payload and the ordered
/// stage groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub input: serde_json::Value,
    pub stages: Vec<StageGroup>,
}

impl JobSpec {
    /// Start a job spec with the given input payload.
    pub fn new(input: serde_json::Value) -> Self {
        Self {
            input,
            stages: Vec::new(),
        }
    }

    /// Append a sequential stage.
    pub fn stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(StageGroup {
            stages: vec![stage],
        });
        self
    }

    /// Append a group of stages that run concurrently.
    pub fn concurrent(mut self, stages: Vec<StageSpec>) -> Self {
        self.stages.push(StageGroup { stages });
        self
    }
}

/// Final disposition of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
    /// Never started: an earlier required stage failed or the job was
    /// cancelled first.
    Skipped,
}

/// Outcome of one stage for one job. Immutable once the stage finishes.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: String,
    pub dependency: String,
    /// Operation invocations made; zero when the call never got through.
    pub attempts: u32,
    pub status: StageStatus,
    /// Wall-clock time for the stage, retries and backoff included.
    pub latency: Duration,
    pub error: Option<String>,
    pub output: Option<serde_json::Value>,
}

impl StageResult {
    pub(crate) fn skipped(stage: &StageSpec) -> Self {
        Self {
            stage: stage.name.clone(),
            dependency: stage.dependency.clone(),
            attempts: 0,
            status: StageStatus::Skipped,
            latency: Duration::ZERO,
            error: None,
            output: None,
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, waiting for a run slot.
    Pending,
    Running,
    /// Every required stage succeeded and no optional stage failed.
    Completed,
    /// Required stages succeeded; one or more optional stages failed.
    PartialFailure,
    /// A required stage failed.
    Failed,
    Cancelled,
}

impl JobStatus {
    /// True once the job can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartialFailure | Self::Failed | Self::Cancelled
        )
    }
}

/// Point-in-time view of a job and its stage results.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: JobId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub stages: Vec<StageResult>,
}
