//! Typed event stream published by the coordinator.
//!
//! External collaborators (metrics exporters, notification fanout, the
//! journal) subscribe with [`crate::Coordinator::subscribe`] and consume the
//! channel; a lagging subscriber loses old events but never blocks job
//! execution.

use serde::Serialize;

use crate::coordinator::{JobId, JobStatus, StageResult};

/// Something the coordinator did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    JobStarted {
        job_id: JobId,
    },
    StageStarted {
        job_id: JobId,
        stage: String,
        dependency: String,
    },
    StageFinished {
        job_id: JobId,
        result: StageResult,
    },
    JobFinished {
        job_id: JobId,
        status: JobStatus,
    },
}
