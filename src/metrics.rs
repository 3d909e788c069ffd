//! Per-dependency call metrics and the exported snapshot.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

use crate::breaker::CircuitState;

/// Upper bounds of the latency histogram buckets, in milliseconds. The final
/// bucket is unbounded.
const LATENCY_BOUNDS_MS: [u64; 6] = [10, 50, 250, 1_000, 5_000, 30_000];

/// Why a call was turned away before reaching the dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The circuit breaker was open.
    CircuitOpen,
    /// Rate-limit admission timed out.
    AdmissionTimeout,
}

#[derive(Default)]
struct Counters {
    attempts: u64,
    successes: u64,
    failures: u64,
    circuit_rejections: u64,
    admission_rejections: u64,
    latency: [u64; LATENCY_BOUNDS_MS.len() + 1],
}

/// Counters for one dependency, appended by the call executor after every
/// attempt. Never reset.
#[derive(Default)]
pub struct DependencyMetrics {
    inner: Mutex<Counters>,
}

impl DependencyMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record one completed attempt and its latency.
    pub fn record_attempt(&self, latency: Duration, success: bool) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.attempts += 1;
        if success {
            inner.successes += 1;
        } else {
            inner.failures += 1;
        }
        let ms = latency.as_millis() as u64;
        let bucket = LATENCY_BOUNDS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(LATENCY_BOUNDS_MS.len());
        inner.latency[bucket] += 1;
    }

    /// Record a call rejected before any attempt was made.
    pub fn record_rejection(&self, rejection: Rejection) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        match rejection {
            Rejection::CircuitOpen => inner.circuit_rejections += 1,
            Rejection::AdmissionTimeout => inner.admission_rejections += 1,
        }
    }

    pub(crate) fn snapshot_into(
        &self,
        name: &str,
        breaker_state: CircuitState,
        tokens_available: f64,
    ) -> DependencySnapshot {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        let latency_buckets = inner
            .latency
            .iter()
            .enumerate()
            .map(|(i, &count)| LatencyBucket {
                le_ms: LATENCY_BOUNDS_MS.get(i).copied(),
                count,
            })
            .collect();
        DependencySnapshot {
            name: name.to_string(),
            attempts: inner.attempts,
            successes: inner.successes,
            failures: inner.failures,
            circuit_rejections: inner.circuit_rejections,
            admission_rejections: inner.admission_rejections,
            breaker_state,
            tokens_available,
            latency_buckets,
        }
    }
}

/// One cumulative latency histogram bucket; `le_ms: None` is the overflow
/// bucket.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyBucket {
    pub le_ms: Option<u64>,
    pub count: u64,
}

/// Read-only view of one dependency's counters and runtime state, for an
/// external dashboard or alerting consumer.
#[derive(Debug, Clone, Serialize)]
pub struct DependencySnapshot {
    pub name: String,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub circuit_rejections: u64,
    pub admission_rejections: u64,
    pub breaker_state: CircuitState,
    pub tokens_available: f64,
    pub latency_buckets: Vec<LatencyBucket>,
}
