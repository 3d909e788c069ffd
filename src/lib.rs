//! # Outrigger
//!
//! The embeddable resilience orchestrator.
//!
//! Runs jobs through ordered pipelines of remote calls - extract, transcribe,
//! analyze, store - while shielding every external dependency behind a token
//! bucket, a circuit breaker and bounded, jittered retries. A library, not a
//! service: everything runs as cooperative tasks in your process.
//!
//! ## Why Outrigger?
//!
//! - **Failure isolation** - per-dependency circuit breakers stop one broken
//!   API from dragging the whole pipeline down
//! - **Admission control** - lazy token buckets keep bursts inside each
//!   provider's rate limit
//! - **Partial-failure visibility** - every stage outcome is recorded;
//!   optional stages can fail without failing the job
//! - **Observable by default** - typed event stream, per-dependency metrics
//!   snapshots and health reports
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use outrigger::{
//!     Coordinator, DependencyConfig, DependencyRegistry, JobSpec, RegistryConfig, StageSpec,
//! };
//!
//! let config = RegistryConfig::new()
//!     .dependency("youtube-api", DependencyConfig::new(2.0, 4))
//!     .dependency("gemini-api", DependencyConfig::new(5.0, 10));
//! let registry = Arc::new(DependencyRegistry::from_config(config)?);
//!
//! let coordinator = Coordinator::builder(registry)
//!     .operation(ExtractVideo)
//!     .operation(Transcribe)
//!     .operation(Analyze)
//!     .build();
//!
//! let handle = coordinator.submit(
//!     JobSpec::new(serde_json::json!({"video_id": "dQw4w9WgXcQ"}))
//!         .stage(StageSpec::new("extract", "youtube-api", "extract_video"))
//!         .stage(StageSpec::new("transcribe", "whisper-api", "transcribe"))
//!         .concurrent(vec![
//!             StageSpec::new("analyze_gemini", "gemini-api", "analyze").optional(),
//!             StageSpec::new("analyze_openai", "openai-api", "analyze").optional(),
//!         ]),
//! )?;
//!
//! let report = handle.wait().await;
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` - Enable the SQLite-backed execution journal

pub mod breaker;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod executor;
pub mod health;
pub mod limiter;
pub mod metrics;
pub mod operation;
pub mod registry;
pub mod retry;

pub use breaker::{CircuitBreaker, CircuitState, Permit};
pub use config::{ConfigError, DependencyConfig, RegistryConfig};
pub use coordinator::{
    Coordinator, CoordinatorBuilder, JobHandle, JobId, JobReport, JobSpec, JobStatus, StageGroup,
    StageResult, StageSpec, StageStatus, SubmitError,
};
pub use events::Event;
pub use executor::{CallExecutor, CallOptions, ExecuteError};
pub use health::{DependencyHealth, HealthMonitor, HealthReport};
pub use limiter::{Admission, TokenBucket};
pub use metrics::{DependencyMetrics, DependencySnapshot, LatencyBucket, Rejection};
pub use operation::{CallError, Operation};
pub use registry::{Dependency, DependencyRegistry};
pub use retry::RetryPolicy;

#[cfg(feature = "sqlite")]
pub mod journal;

#[cfg(feature = "sqlite")]
pub use journal::{JournalError, JournaledJob, JournaledStage, SqliteJournal};
