//! Job cancellation semantics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use outrigger::{
    CallError, Coordinator, DependencyConfig, DependencyRegistry, JobSpec, JobStatus, Operation,
    RegistryConfig, StageSpec, StageStatus,
};
use serde_json::{json, Value};
use tokio::time::Instant;

fn test_registry() -> Arc<DependencyRegistry> {
    let generous = || {
        DependencyConfig::new(1_000.0, 1_000)
            .breaker(100, Duration::from_secs(60))
            .retries(2, Duration::from_millis(10), Duration::from_millis(50))
    };
    let config = RegistryConfig::new()
        .dependency("quick-api", generous())
        .dependency("slow-api", generous());
    Arc::new(DependencyRegistry::from_config(config).unwrap())
}

struct QuickOp {
    name: &'static str,
}

#[async_trait]
impl Operation for QuickOp {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn call(&self, input: Value) -> Result<Value, CallError> {
        Ok(input)
    }
}

struct SlowOp {
    name: &'static str,
}

#[async_trait]
impl Operation for SlowOp {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn call(&self, input: Value) -> Result<Value, CallError> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(input)
    }
}

fn coordinator() -> Coordinator {
    Coordinator::builder(test_registry())
        .operation(QuickOp { name: "quick" })
        .operation(QuickOp { name: "finalize" })
        .operation(SlowOp { name: "slow" })
        .build()
}

#[tokio::test]
async fn cancel_aborts_the_in_flight_stage_and_skips_the_rest() {
    let coordinator = coordinator();
    let handle = coordinator
        .submit(
            JobSpec::new(json!({}))
                .stage(StageSpec::new("warmup", "quick-api", "quick"))
                .stage(StageSpec::new("blocked", "slow-api", "slow"))
                .stage(StageSpec::new("finalize", "quick-api", "finalize")),
        )
        .unwrap();

    // Let the slow stage get in flight, then cancel.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let start = Instant::now();
    handle.cancel();
    let report = handle.wait().await;

    assert!(
        start.elapsed() < Duration::from_secs(1),
        "cancellation must not wait out the slow call"
    );
    assert_eq!(report.status, JobStatus::Cancelled);

    let by_name = |name: &str| report.stages.iter().find(|s| s.stage == name).unwrap();
    assert_eq!(by_name("warmup").status, StageStatus::Success);
    assert_eq!(by_name("blocked").status, StageStatus::Failed);
    assert!(by_name("blocked").error.as_deref().unwrap().contains("cancelled"));
    assert_eq!(by_name("finalize").status, StageStatus::Skipped);
}

#[tokio::test]
async fn cancelling_a_finished_job_is_a_noop() {
    let coordinator = coordinator();
    let handle = coordinator
        .submit(JobSpec::new(json!({})).stage(StageSpec::new("warmup", "quick-api", "quick")))
        .unwrap();

    let before = handle.wait().await;
    assert_eq!(before.status, JobStatus::Completed);

    handle.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = handle.report();
    assert_eq!(after.status, JobStatus::Completed, "status must not change");
    assert_eq!(after.stages.len(), before.stages.len());
    assert!(after
        .stages
        .iter()
        .zip(before.stages.iter())
        .all(|(a, b)| a.status == b.status && a.attempts == b.attempts));
}

#[tokio::test]
async fn cancel_while_queued_never_starts_a_stage() {
    let coordinator = Coordinator::builder(test_registry())
        .operation(QuickOp { name: "quick" })
        .operation(SlowOp { name: "slow" })
        .max_concurrent_jobs(1)
        .build();

    let blocker = coordinator
        .submit(JobSpec::new(json!({})).stage(StageSpec::new("hold", "slow-api", "slow")))
        .unwrap();
    let queued = coordinator
        .submit(JobSpec::new(json!({})).stage(StageSpec::new("work", "quick-api", "quick")))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queued.status(), JobStatus::Pending, "second job waits for a slot");

    queued.cancel();
    let report = queued.wait().await;
    assert_eq!(report.status, JobStatus::Cancelled);
    assert!(report
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Skipped && s.attempts == 0));

    blocker.cancel();
    let report = blocker.wait().await;
    assert_eq!(report.status, JobStatus::Cancelled);
}
