//! Dependency configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Error raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("dependency '{0}': rate must be positive and finite")]
    InvalidRate(String),

    #[error("dependency '{0}': burst must be at least 1")]
    ZeroBurst(String),

    #[error("dependency '{0}': failure_threshold must be at least 1")]
    ZeroThreshold(String),

    #[error("dependency '{0}': max_attempts must be at least 1")]
    ZeroAttempts(String),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resilience settings for one external dependency.
///
/// Durations are configured in milliseconds so the whole struct maps onto a
/// flat JSON object in an external config store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Sustained request rate, tokens per second.
    pub rate: f64,
    /// Bucket capacity; also the initial token count.
    pub burst: u32,
    /// How long an admission may wait for a token before rejection.
    #[serde(default = "defaults::max_wait_ms")]
    pub max_wait_ms: u64,
    /// Consecutive failures that trip the breaker.
    #[serde(default = "defaults::failure_threshold")]
    pub failure_threshold: u32,
    /// How long a tripped breaker rejects before probing.
    #[serde(default = "defaults::open_for_ms")]
    pub open_for_ms: u64,
    /// Total call attempts, including the first.
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
    /// Initial retry backoff.
    #[serde(default = "defaults::base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Retry backoff cap.
    #[serde(default = "defaults::max_backoff_ms")]
    pub max_backoff_ms: u64,
}

mod defaults {
    pub fn max_wait_ms() -> u64 {
        1_000
    }
    pub fn failure_threshold() -> u32 {
        5
    }
    pub fn open_for_ms() -> u64 {
        30_000
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn base_backoff_ms() -> u64 {
        500
    }
    pub fn max_backoff_ms() -> u64 {
        30_000
    }
}

impl DependencyConfig {
    /// Create a config with the given admission rate and defaults elsewhere.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst,
            max_wait_ms: defaults::max_wait_ms(),
            failure_threshold: defaults::failure_threshold(),
            open_for_ms: defaults::open_for_ms(),
            max_attempts: defaults::max_attempts(),
            base_backoff_ms: defaults::base_backoff_ms(),
            max_backoff_ms: defaults::max_backoff_ms(),
        }
    }

    /// Set the admission max wait.
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait_ms = wait.as_millis() as u64;
        self
    }

    /// Set the breaker trip threshold and open window.
    pub fn breaker(mut self, failure_threshold: u32, open_for: Duration) -> Self {
        self.failure_threshold = failure_threshold;
        self.open_for_ms = open_for.as_millis() as u64;
        self
    }

    /// Set the retry attempt budget and backoff bounds.
    pub fn retries(mut self, max_attempts: u32, base: Duration, max: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.base_backoff_ms = base.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    /// Admission max wait as a duration.
    pub fn max_wait_duration(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Breaker open window as a duration.
    pub fn open_for_duration(&self) -> Duration {
        Duration::from_millis(self.open_for_ms)
    }

    /// The retry policy this config describes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::Exponential {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.base_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(ConfigError::InvalidRate(name.to_string()));
        }
        if self.burst == 0 {
            return Err(ConfigError::ZeroBurst(name.to_string()));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold(name.to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts(name.to_string()));
        }
        Ok(())
    }
}

/// The full dependency map handed to [`crate::DependencyRegistry`] at
/// startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub dependencies: HashMap<String, DependencyConfig>,
}

impl RegistryConfig {
    /// Start an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one dependency.
    pub fn dependency(mut self, name: impl Into<String>, config: DependencyConfig) -> Self {
        self.dependencies.insert(name.into(), config);
        self
    }

    /// Parse from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Check every dependency's invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, config) in &self.dependencies {
            config.validate(name)?;
        }
        Ok(())
    }
}
