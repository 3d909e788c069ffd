//! Token-bucket admission control.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Outcome of a rate-limit admission attempt.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A token was taken; the call may proceed.
    Granted,
    /// No token became available within the configured max wait.
    TimedOut,
}

impl Admission {
    /// Returns true if the call was admitted.
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Lazy token bucket limiting request rate to one dependency.
///
/// Tokens accumulate continuously at `rate` per second up to `burst`. Refill
/// is computed from elapsed time on each acquire, so no background timer is
/// needed. The refill-then-decrement section runs under a single mutex that
/// is never held across an await.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    max_wait: Duration,
    inner: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, rate: f64, burst: f64) {
        // Clock regressions read as zero elapsed, never negative.
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate).min(burst);
        self.last_refill = now;
    }
}

impl TokenBucket {
    /// Create a bucket starting full.
    ///
    /// Callers reach this through a validated [`crate::DependencyConfig`],
    /// which guarantees a positive finite rate and `burst >= 1`.
    pub(crate) fn new(rate: f64, burst: u32, max_wait: Duration) -> Self {
        Self {
            rate,
            burst: f64::from(burst),
            max_wait,
            inner: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, suspending until one is available or the max wait
    /// elapses.
    ///
    /// A waiter that cannot possibly be served before its deadline is
    /// rejected immediately rather than sleeping it out. Admission order is
    /// first-come-biased but not strictly FIFO.
    pub async fn acquire(&self) -> Admission {
        let deadline = Instant::now() + self.max_wait;
        loop {
            let wait = {
                let mut state = self.inner.lock().await;
                let now = Instant::now();
                state.refill(now, self.rate, self.burst);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Admission::Granted;
                }
                // Time until the deficit refills. Another waiter may take
                // the token first, so availability is re-checked after the
                // sleep.
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.rate).max(Duration::from_millis(1))
            };
            if Instant::now() + wait > deadline {
                return Admission::TimedOut;
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Current token level after refill. For snapshots only.
    pub async fn available(&self) -> f64 {
        let mut state = self.inner.lock().await;
        state.refill(Instant::now(), self.rate, self.burst);
        state.tokens
    }
}
