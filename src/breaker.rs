//! Circuit breaker state machine.
//!
//! Fails fast against a dependency that is persistently erroring instead of
//! piling latency onto a broken downstream. Transitions:
//!
//! ```text
//! Closed -> Open:      consecutive failures reach the threshold
//! Open -> HalfOpen:    the open window elapses
//! HalfOpen -> Closed:  the single probe call succeeds
//! HalfOpen -> Open:    the probe call fails
//! ```

use std::sync::Mutex;
use std::time::Duration;
use serde::Serialize;
use tokio::time::Instant;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Failing, calls are rejected without reaching the dependency.
    Open,
    /// Probing recovery, one call allowed through at a time.
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-dependency failure-isolation state machine. Pure local state, no I/O;
/// the lock is only held across non-yielding sections.
pub struct CircuitBreaker {
    failure_threshold: u32,
    open_for: Duration,
    inner: Mutex<BreakerState>,
}

/// Permission for one call, handed out by [`CircuitBreaker::before_call`].
///
/// Feed the outcome back with [`Permit::record`]. Dropping a permit without
/// recording (the call was cancelled or timed out before completing)
/// releases the half-open probe slot without counting for or against the
/// breaker.
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    is_probe: bool,
    recorded: bool,
}

impl CircuitBreaker {
    pub(crate) fn new(failure_threshold: u32, open_for: Duration) -> Self {
        Self {
            failure_threshold,
            open_for,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Ask to make one call. Returns `None` if the circuit is open, or a
    /// half-open probe is already in flight.
    pub fn before_call(&self) -> Option<Permit<'_>> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        Self::advance_open_window(&mut inner, self.open_for);
        match inner.state {
            CircuitState::Closed => Some(Permit {
                breaker: self,
                is_probe: false,
                recorded: false,
            }),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(Permit {
                        breaker: self,
                        is_probe: true,
                        recorded: false,
                    })
                }
            }
        }
    }

    /// Effective state: an open breaker whose window has elapsed reports
    /// half-open.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        Self::advance_open_window(&mut inner, self.open_for);
        inner.state
    }

    /// Consecutive failures observed while closed.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner
            .lock()
            .expect("breaker lock poisoned")
            .consecutive_failures
    }

    fn advance_open_window(inner: &mut BreakerState, open_for: Duration) {
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| at.elapsed())
                .unwrap_or(Duration::ZERO);
            if elapsed >= open_for {
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = false;
            }
        }
    }

    fn record(&self, is_probe: bool, success: bool) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if is_probe {
            inner.probe_in_flight = false;
            if success {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
            } else {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            return;
        }
        // Outcomes from before the trip can arrive after it; while not
        // closed they must not disturb the open window or the probe.
        if inner.state != CircuitState::Closed {
            return;
        }
        if success {
            inner.consecutive_failures = 0;
        } else {
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            if inner.consecutive_failures >= self.failure_threshold {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_failures = 0;
            }
        }
    }

    fn abandon(&self, is_probe: bool) {
        if is_probe {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            inner.probe_in_flight = false;
        }
    }
}

impl Permit<'_> {
    /// Record the call outcome. Must be called exactly once per permitted
    /// call that ran to completion.
    pub fn record(mut self, success: bool) {
        self.recorded = true;
        self.breaker.record(self.is_probe, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.abandon(self.is_probe);
        }
    }
}
