//! Cross-dependency health aggregation.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

use crate::breaker::CircuitState;
use crate::registry::DependencyRegistry;

/// Health view of one dependency.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyHealth {
    pub name: String,
    pub breaker_state: CircuitState,
    pub failures: u64,
    pub circuit_rejections: u64,
    pub tokens_available: f64,
    /// A dependency is healthy while its breaker is closed.
    pub healthy: bool,
}

/// Aggregated health across every registered dependency.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub dependencies: Vec<DependencyHealth>,
}

/// Computes health reports on demand and can run as a periodic task that
/// logs the aggregate view.
pub struct HealthMonitor {
    registry: Arc<DependencyRegistry>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<DependencyRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Compute the current health report.
    pub async fn report(&self) -> HealthReport {
        let dependencies: Vec<DependencyHealth> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .map(|snap| DependencyHealth {
                healthy: snap.breaker_state == CircuitState::Closed,
                name: snap.name,
                breaker_state: snap.breaker_state,
                failures: snap.failures,
                circuit_rejections: snap.circuit_rejections,
                tokens_available: snap.tokens_available,
            })
            .collect();
        HealthReport {
            healthy: dependencies.iter().all(|dep| dep.healthy),
            dependencies,
        }
    }

    /// Log the health report at each interval, indefinitely.
    pub async fn run(&self) -> ! {
        let mut ticker = interval(self.interval);
        ticker.tick().await; // Consume immediate first tick

        loop {
            ticker.tick().await;
            let report = self.report().await;
            if report.healthy {
                info!(
                    dependencies = report.dependencies.len(),
                    "all dependencies healthy"
                );
            } else {
                let degraded: Vec<&str> = report
                    .dependencies
                    .iter()
                    .filter(|dep| !dep.healthy)
                    .map(|dep| dep.name.as_str())
                    .collect();
                warn!(?degraded, "degraded dependencies");
            }
        }
    }
}
