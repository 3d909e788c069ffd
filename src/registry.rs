//! Dependency registry: per-dependency runtime state, built once at startup
//! and injected by reference everywhere it is needed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::breaker::CircuitBreaker;
use crate::config::{ConfigError, DependencyConfig, RegistryConfig};
use crate::limiter::TokenBucket;
use crate::metrics::{DependencyMetrics, DependencySnapshot};
use crate::retry::RetryPolicy;

/// One external service and its resilience state: token bucket, breaker and
/// metrics. Configuration is immutable after construction; runtime state is
/// serialized per dependency, so work against different dependencies never
/// contends.
pub struct Dependency {
    name: String,
    config: DependencyConfig,
    limiter: TokenBucket,
    breaker: CircuitBreaker,
    metrics: DependencyMetrics,
}

impl Dependency {
    fn from_config(name: String, config: DependencyConfig) -> Self {
        let limiter = TokenBucket::new(config.rate, config.burst, config.max_wait_duration());
        let breaker = CircuitBreaker::new(config.failure_threshold, config.open_for_duration());
        Self {
            name,
            config,
            limiter,
            breaker,
            metrics: DependencyMetrics::new(),
        }
    }

    /// The unique dependency name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured retry policy for calls against this dependency.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.retry_policy()
    }

    pub fn limiter(&self) -> &TokenBucket {
        &self.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &DependencyMetrics {
        &self.metrics
    }

    /// Counters plus current breaker state and token level.
    pub async fn snapshot(&self) -> DependencySnapshot {
        let state = self.breaker.state();
        let tokens = self.limiter.available().await;
        self.metrics.snapshot_into(&self.name, state, tokens)
    }
}

/// All known dependencies, keyed by name.
///
/// Built once from validated configuration and shared by `Arc` into the
/// executor and coordinator; there is no global registry.
pub struct DependencyRegistry {
    dependencies: HashMap<String, Arc<Dependency>>,
}

impl DependencyRegistry {
    /// Build the registry, validating every dependency's configuration.
    pub fn from_config(config: RegistryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let dependencies = config
            .dependencies
            .into_iter()
            .map(|(name, dep)| {
                let dependency = Arc::new(Dependency::from_config(name.clone(), dep));
                (name, dependency)
            })
            .collect();
        Ok(Self { dependencies })
    }

    /// Look up a dependency by name.
    pub fn get(&self, name: &str) -> Option<Arc<Dependency>> {
        self.dependencies.get(name).cloned()
    }

    /// Whether a dependency is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    /// Registered dependency names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    /// Read-only snapshots of every dependency, sorted by name.
    pub async fn snapshot(&self) -> Vec<DependencySnapshot> {
        let mut snapshots = Vec::with_capacity(self.dependencies.len());
        for dependency in self.dependencies.values() {
            snapshots.push(dependency.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
