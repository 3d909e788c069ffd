//! Call executor: wraps a single remote call with admission control,
//! circuit breaking and bounded, jittered retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::limiter::Admission;
use crate::metrics::Rejection;
use crate::operation::CallError;
use crate::registry::DependencyRegistry;
use crate::retry::RetryPolicy;

/// Error returned by [`CallExecutor::execute`].
#[derive(Error, Debug)]
pub enum ExecuteError {
    /// No dependency with this name in the registry.
    #[error("dependency '{0}' is not registered")]
    UnknownDependency(String),

    /// The breaker rejected the call without attempting it.
    #[error("circuit open for '{dependency}'")]
    CircuitOpen { dependency: String },

    /// Admission timed out waiting for a token.
    #[error("rate limit admission timed out for '{dependency}'")]
    RateLimited { dependency: String },

    /// The operation failed with a non-retryable error.
    #[error("call to '{dependency}' failed permanently: {source}")]
    Permanent {
        dependency: String,
        #[source]
        source: anyhow::Error,
    },

    /// Every allowed attempt failed with a retryable error; wraps the last.
    #[error("call to '{dependency}' still failing after {attempts} attempts: {source}")]
    RetriesExhausted {
        dependency: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The deadline elapsed mid retry loop.
    #[error("deadline exceeded calling '{dependency}'")]
    DeadlineExceeded { dependency: String },

    /// The call was cancelled.
    #[error("call to '{dependency}' cancelled")]
    Cancelled { dependency: String },
}

/// Options for one executed call.
#[derive(Default)]
pub struct CallOptions {
    /// Deadline for the whole retry loop, backoff sleeps included.
    pub timeout: Option<Duration>,
    /// Cooperative cancellation; aborts waits, backoff and the in-flight
    /// attempt.
    pub cancellation: Option<CancellationToken>,
    /// Override for the dependency's configured retry policy.
    pub policy: Option<RetryPolicy>,
}

impl CallOptions {
    /// Set the retry-loop deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Override the retry policy for this call only.
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// Executes remote calls through the per-dependency resilience stack.
///
/// The executor owns no state of its own; everything lives in the shared
/// [`DependencyRegistry`], so clones are cheap and every caller sees the same
/// breaker and bucket.
#[derive(Clone)]
pub struct CallExecutor {
    registry: Arc<DependencyRegistry>,
}

impl CallExecutor {
    pub fn new(registry: Arc<DependencyRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this executor runs against.
    pub fn registry(&self) -> &Arc<DependencyRegistry> {
        &self.registry
    }

    /// Execute `op` against `dependency` with its configured retry policy.
    pub async fn execute<T, F, Fut>(&self, dependency: &str, op: F) -> Result<T, ExecuteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.execute_with(dependency, CallOptions::default(), op).await
    }

    /// Execute `op` against `dependency`.
    ///
    /// Each attempt passes the breaker gate and token-bucket admission
    /// before the operation is invoked. Retryable failures back off with
    /// jitter and loop; permanent failures, breaker rejections and admission
    /// timeouts return immediately. Deadline or cancellation abort the loop
    /// at any suspension point, including mid-backoff.
    pub async fn execute_with<T, F, Fut>(
        &self,
        dependency: &str,
        options: CallOptions,
        mut op: F,
    ) -> Result<T, ExecuteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let dep = self
            .registry
            .get(dependency)
            .ok_or_else(|| ExecuteError::UnknownDependency(dependency.to_string()))?;
        let policy = options.policy.unwrap_or_else(|| dep.retry_policy());
        let cancel = options.cancellation.unwrap_or_default();
        let deadline = options.timeout.map(|t| Instant::now() + t);
        let max_attempts = policy.max_attempts().max(1);

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let Some(permit) = dep.breaker().before_call() else {
                dep.metrics().record_rejection(Rejection::CircuitOpen);
                return Err(ExecuteError::CircuitOpen {
                    dependency: dep.name().to_string(),
                });
            };

            let admission =
                bounded(&cancel, deadline, dep.name(), dep.limiter().acquire()).await?;
            if admission == Admission::TimedOut {
                dep.metrics().record_rejection(Rejection::AdmissionTimeout);
                return Err(ExecuteError::RateLimited {
                    dependency: dep.name().to_string(),
                });
            }

            let started = Instant::now();
            let outcome = bounded(&cancel, deadline, dep.name(), op()).await?;
            let latency = started.elapsed();

            match outcome {
                Ok(value) => {
                    dep.metrics().record_attempt(latency, true);
                    permit.record(true);
                    return Ok(value);
                }
                Err(CallError::Permanent(source)) => {
                    dep.metrics().record_attempt(latency, false);
                    permit.record(false);
                    return Err(ExecuteError::Permanent {
                        dependency: dep.name().to_string(),
                        source,
                    });
                }
                Err(CallError::Retryable(source)) => {
                    dep.metrics().record_attempt(latency, false);
                    permit.record(false);
                    if attempt >= max_attempts {
                        warn!(
                            dependency = dep.name(),
                            attempts = attempt,
                            error = %source,
                            "retries exhausted"
                        );
                        return Err(ExecuteError::RetriesExhausted {
                            dependency: dep.name().to_string(),
                            attempts: attempt,
                            source,
                        });
                    }
                    let delay = policy.jittered_delay(attempt).unwrap_or(Duration::ZERO);
                    debug!(
                        dependency = dep.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "retrying after backoff"
                    );
                    bounded(&cancel, deadline, dep.name(), tokio::time::sleep(delay)).await?;
                }
            }
        }
    }
}

/// Race a future against cancellation and the loop deadline.
async fn bounded<T>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    dependency: &str,
    fut: impl Future<Output = T>,
) -> Result<T, ExecuteError> {
    match deadline {
        Some(at) => tokio::select! {
            _ = cancel.cancelled() => Err(ExecuteError::Cancelled {
                dependency: dependency.to_string(),
            }),
            _ = tokio::time::sleep_until(at) => Err(ExecuteError::DeadlineExceeded {
                dependency: dependency.to_string(),
            }),
            value = fut => Ok(value),
        },
        None => tokio::select! {
            _ = cancel.cancelled() => Err(ExecuteError::Cancelled {
                dependency: dependency.to_string(),
            }),
            value = fut => Ok(value),
        },
    }
}
