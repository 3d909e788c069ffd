//! Retry policy configuration.

use rand::Rng;
use std::time::Duration;

/// Policy for retrying failed remote calls.
///
/// `max_attempts` counts total invocations including the first; `None`
/// performs a single attempt and never retries.
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    /// No retries - a single attempt, fail immediately.
    None,

    /// Fixed delay between retries.
    Fixed {
        /// Maximum number of attempts, including the first.
        max_attempts: u32,
        /// Delay between attempts.
        delay: Duration,
    },

    /// Exponential backoff between retries.
    Exponential {
        /// Maximum number of attempts, including the first.
        max_attempts: u32,
        /// Initial delay (doubles each attempt).
        initial_delay: Duration,
        /// Maximum delay cap.
        max_delay: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::None
    }
}

impl RetryPolicy {
    /// Create an exponential backoff policy with sensible defaults.
    ///
    /// - Initial delay: 500 milliseconds
    /// - Max delay: 30 seconds
    pub fn exponential(max_attempts: u32) -> Self {
        Self::Exponential {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Create a fixed delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed { max_attempts, delay }
    }

    /// Calculate the pre-jitter delay after a failed attempt (1-indexed).
    ///
    /// Returns `None` if the policy allows no further attempts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_attempts, delay } => {
                if attempt < *max_attempts {
                    Some(*delay)
                } else {
                    None
                }
            }
            Self::Exponential {
                max_attempts,
                initial_delay,
                max_delay,
            } => {
                if attempt < *max_attempts {
                    // 2^(attempt-1) * initial_delay, capped at max_delay
                    let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1));
                    let delay_ms = (initial_delay.as_millis() as u64).saturating_mul(multiplier);
                    let delay = Duration::from_millis(delay_ms.min(max_delay.as_millis() as u64));
                    Some(delay)
                } else {
                    None
                }
            }
        }
    }

    /// Calculate the jittered delay after a failed attempt (1-indexed).
    ///
    /// Multiplies the pre-jitter delay by a uniform factor in `[0.5, 1.5)`
    /// so concurrent callers retrying against the same dependency spread out
    /// instead of thundering back at once. The result is still capped at the
    /// policy's max delay.
    pub fn jittered_delay(&self, attempt: u32) -> Option<Duration> {
        let base = self.delay_for_attempt(attempt)?;
        let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = base.mul_f64(factor);
        Some(match self {
            Self::Exponential { max_delay, .. } => jittered.min(*max_delay),
            _ => jittered,
        })
    }

    /// Returns the maximum number of attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::Exponential { max_attempts, .. } => *max_attempts,
        }
    }
}
