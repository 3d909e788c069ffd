//! SQLite-backed execution journal.
//!
//! Consumes the coordinator's event stream and persists job and stage
//! history for later inspection. Enabled with the `sqlite` feature.

use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::coordinator::{JobStatus, StageStatus};
use crate::events::Event;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outrigger_jobs (
    job_id INTEGER PRIMARY KEY,
    status TEXT NOT NULL,
    started_at TEXT DEFAULT (datetime('now')),
    finished_at TEXT
);

CREATE TABLE IF NOT EXISTS outrigger_stages (
    id INTEGER PRIMARY KEY,
    job_id INTEGER NOT NULL,
    stage TEXT NOT NULL,
    dependency TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    latency_ms INTEGER NOT NULL,
    error_message TEXT,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_outrigger_stages_job ON outrigger_stages(job_id);
CREATE INDEX IF NOT EXISTS idx_outrigger_stages_dependency ON outrigger_stages(dependency, recorded_at);
"#;

/// Error type for journal operations.
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// A journaled job row.
#[derive(Debug, Clone)]
pub struct JournaledJob {
    pub job_id: u64,
    pub status: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// A journaled stage execution row.
#[derive(Debug, Clone)]
pub struct JournaledStage {
    pub job_id: u64,
    pub stage: String,
    pub dependency: String,
    pub status: String,
    pub attempts: u32,
    pub latency_ms: u64,
    pub error_message: Option<String>,
}

/// SQLite journal of coordinator activity.
#[derive(Clone)]
pub struct SqliteJournal {
    pool: SqlitePool,
}

impl SqliteJournal {
    /// Create a journal over the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn run_migrations(&self) -> Result<(), JournalError> {
        for statement in SCHEMA.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| JournalError::Storage(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Consume coordinator events until the channel closes.
    ///
    /// Spawn this alongside the coordinator:
    ///
    /// ```rust,ignore
    /// let journal = SqliteJournal::new(pool);
    /// journal.run_migrations().await?;
    /// tokio::spawn({
    ///     let journal = journal.clone();
    ///     let events = coordinator.subscribe();
    ///     async move { journal.run(events).await }
    /// });
    /// ```
    pub async fn run(&self, mut events: broadcast::Receiver<Event>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = self.record(&event).await {
                        error!(error = %e, "failed to journal event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "journal lagged behind the event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Persist one event.
    pub async fn record(&self, event: &Event) -> Result<(), JournalError> {
        match event {
            Event::JobStarted { job_id } => {
                sqlx::query(
                    r#"
                    INSERT INTO outrigger_jobs (job_id, status) VALUES (?, 'running')
                    ON CONFLICT(job_id) DO UPDATE SET status = 'running'
                    "#,
                )
                .bind(job_id.0 as i64)
                .execute(&self.pool)
                .await
                .map_err(|e| JournalError::Storage(e.to_string()))?;
            }
            Event::StageStarted { .. } => {}
            Event::StageFinished { job_id, result } => {
                sqlx::query(
                    r#"
                    INSERT INTO outrigger_stages
                        (job_id, stage, dependency, status, attempts, latency_ms, error_message)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(job_id.0 as i64)
                .bind(&result.stage)
                .bind(&result.dependency)
                .bind(stage_status_str(result.status))
                .bind(result.attempts as i64)
                .bind(result.latency.as_millis() as i64)
                .bind(result.error.as_deref())
                .execute(&self.pool)
                .await
                .map_err(|e| JournalError::Storage(e.to_string()))?;
            }
            Event::JobFinished { job_id, status } => {
                sqlx::query(
                    r#"
                    INSERT INTO outrigger_jobs (job_id, status, finished_at)
                    VALUES (?, ?, datetime('now'))
                    ON CONFLICT(job_id) DO UPDATE
                        SET status = excluded.status, finished_at = datetime('now')
                    "#,
                )
                .bind(job_id.0 as i64)
                .bind(job_status_str(*status))
                .execute(&self.pool)
                .await
                .map_err(|e| JournalError::Storage(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Most recently submitted jobs, newest first.
    pub async fn recent_jobs(&self, limit: u32) -> Result<Vec<JournaledJob>, JournalError> {
        let rows = sqlx::query_as::<_, (i64, String, Option<String>, Option<String>)>(
            r#"
            SELECT job_id, status, started_at, finished_at
            FROM outrigger_jobs
            ORDER BY job_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| JournalError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(job_id, status, started_at, finished_at)| JournaledJob {
                job_id: job_id as u64,
                status,
                started_at,
                finished_at,
            })
            .collect())
    }

    /// Stage executions recorded for one job, in recorded order.
    pub async fn stages_for_job(&self, job_id: u64) -> Result<Vec<JournaledStage>, JournalError> {
        let rows = sqlx::query_as::<_, (i64, String, String, String, i64, i64, Option<String>)>(
            r#"
            SELECT job_id, stage, dependency, status, attempts, latency_ms, error_message
            FROM outrigger_stages
            WHERE job_id = ?
            ORDER BY id
            "#,
        )
        .bind(job_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| JournalError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(job_id, stage, dependency, status, attempts, latency_ms, error_message)| {
                    JournaledStage {
                        job_id: job_id as u64,
                        stage,
                        dependency,
                        status,
                        attempts: attempts as u32,
                        latency_ms: latency_ms as u64,
                        error_message,
                    }
                },
            )
            .collect())
    }
}

fn job_status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::PartialFailure => "partial_failure",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

fn stage_status_str(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Success => "success",
        StageStatus::Failed => "failed",
        StageStatus::Skipped => "skipped",
    }
}
