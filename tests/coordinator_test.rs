//! End-to-end coordinator behavior: ordering, fan-out, aggregation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use outrigger::{
    CallError, Coordinator, DependencyConfig, DependencyRegistry, Event, JobReport, JobSpec,
    JobStatus, Operation, RegistryConfig, StageSpec, StageStatus, SubmitError,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;

fn test_registry() -> Arc<DependencyRegistry> {
    let generous = || {
        DependencyConfig::new(1_000.0, 1_000)
            .breaker(100, Duration::from_secs(60))
            .retries(2, Duration::from_millis(10), Duration::from_millis(50))
    };
    let config = RegistryConfig::new()
        .dependency("youtube-api", generous())
        .dependency("whisper-api", generous())
        .dependency("gemini-api", generous())
        .dependency("openai-api", generous())
        .dependency("storage", generous());
    Arc::new(DependencyRegistry::from_config(config).unwrap())
}

/// Records every input it sees, then returns a fixed output.
struct RecordingOp {
    name: &'static str,
    output: Value,
    inputs: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Operation for RecordingOp {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn call(&self, input: Value) -> Result<Value, CallError> {
        self.inputs.lock().await.push(input);
        Ok(self.output.clone())
    }
}

struct AlwaysFailsOp {
    name: &'static str,
}

#[async_trait]
impl Operation for AlwaysFailsOp {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn call(&self, _input: Value) -> Result<Value, CallError> {
        Err(CallError::permanent(anyhow::anyhow!("invalid credentials")))
    }
}

struct SleepyOp {
    name: &'static str,
    duration: Duration,
}

#[async_trait]
impl Operation for SleepyOp {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn call(&self, input: Value) -> Result<Value, CallError> {
        tokio::time::sleep(self.duration).await;
        Ok(input)
    }
}

fn stage<'a>(report: &'a JobReport, name: &str) -> &'a outrigger::StageResult {
    report
        .stages
        .iter()
        .find(|result| result.stage == name)
        .unwrap_or_else(|| panic!("no stage '{}' in report", name))
}

#[tokio::test]
async fn sequential_stages_thread_payload_in_order() {
    let inputs = Arc::new(Mutex::new(Vec::new()));
    let coordinator = Coordinator::builder(test_registry())
        .operation(RecordingOp {
            name: "extract",
            output: json!({"frames": 12}),
            inputs: inputs.clone(),
        })
        .operation(RecordingOp {
            name: "transcribe",
            output: json!({"text": "hello"}),
            inputs: inputs.clone(),
        })
        .operation(RecordingOp {
            name: "store",
            output: json!({"stored": true}),
            inputs: inputs.clone(),
        })
        .build();

    let handle = coordinator
        .submit(
            JobSpec::new(json!({"video_id": "abc"}))
                .stage(StageSpec::new("extract", "youtube-api", "extract"))
                .stage(StageSpec::new("transcribe", "whisper-api", "transcribe"))
                .stage(StageSpec::new("store", "storage", "store")),
        )
        .unwrap();

    let report = handle.wait().await;
    assert_eq!(report.status, JobStatus::Completed);
    assert!(report.stages.iter().all(|s| s.status == StageStatus::Success));

    let inputs = inputs.lock().await;
    assert_eq!(inputs[0], json!({"video_id": "abc"}), "extract sees the job input");
    assert_eq!(inputs[1], json!({"frames": 12}), "transcribe sees extract's output");
    assert_eq!(inputs[2], json!({"text": "hello"}), "store sees transcribe's output");
}

#[tokio::test]
async fn optional_concurrent_failure_yields_partial_failure() {
    let inputs = Arc::new(Mutex::new(Vec::new()));
    let coordinator = Coordinator::builder(test_registry())
        .operation(RecordingOp {
            name: "extract",
            output: json!({"frames": 3}),
            inputs: inputs.clone(),
        })
        .operation(RecordingOp {
            name: "transcribe",
            output: json!({"text": "..."}),
            inputs: inputs.clone(),
        })
        .operation(AlwaysFailsOp { name: "analyze_gemini" })
        .operation(RecordingOp {
            name: "analyze_openai",
            output: json!({"sentiment": "positive"}),
            inputs: inputs.clone(),
        })
        .build();

    let handle = coordinator
        .submit(
            JobSpec::new(json!({"video_id": "abc"}))
                .stage(StageSpec::new("extract", "youtube-api", "extract"))
                .stage(StageSpec::new("transcribe", "whisper-api", "transcribe"))
                .concurrent(vec![
                    StageSpec::new("analyze_a", "gemini-api", "analyze_gemini").optional(),
                    StageSpec::new("analyze_b", "openai-api", "analyze_openai").optional(),
                ]),
        )
        .unwrap();

    let report = handle.wait().await;
    assert_eq!(report.status, JobStatus::PartialFailure);
    assert_eq!(stage(&report, "analyze_a").status, StageStatus::Failed);
    assert!(stage(&report, "analyze_a")
        .error
        .as_deref()
        .unwrap()
        .contains("invalid credentials"));
    assert_eq!(stage(&report, "analyze_b").status, StageStatus::Success);
}

#[tokio::test]
async fn concurrent_group_outputs_feed_next_stage_keyed_by_name() {
    let inputs = Arc::new(Mutex::new(Vec::new()));
    let coordinator = Coordinator::builder(test_registry())
        .operation(RecordingOp {
            name: "analyze_gemini",
            output: json!({"topics": ["rust"]}),
            inputs: inputs.clone(),
        })
        .operation(RecordingOp {
            name: "analyze_openai",
            output: json!({"sentiment": "positive"}),
            inputs: inputs.clone(),
        })
        .operation(RecordingOp {
            name: "store",
            output: json!({"stored": true}),
            inputs: inputs.clone(),
        })
        .build();

    let handle = coordinator
        .submit(
            JobSpec::new(json!({"transcript": "..."}))
                .concurrent(vec![
                    StageSpec::new("analyze_a", "gemini-api", "analyze_gemini"),
                    StageSpec::new("analyze_b", "openai-api", "analyze_openai"),
                ])
                .stage(StageSpec::new("store", "storage", "store")),
        )
        .unwrap();

    let report = handle.wait().await;
    assert_eq!(report.status, JobStatus::Completed);

    let inputs = inputs.lock().await;
    let store_input = inputs.last().unwrap();
    assert_eq!(
        store_input,
        &json!({
            "analyze_a": {"topics": ["rust"]},
            "analyze_b": {"sentiment": "positive"},
        }),
        "store receives both analyzer outputs keyed by stage name"
    );
}

#[tokio::test]
async fn required_failure_fails_job_and_skips_later_stages() {
    let inputs = Arc::new(Mutex::new(Vec::new()));
    let coordinator = Coordinator::builder(test_registry())
        .operation(RecordingOp {
            name: "extract",
            output: json!({}),
            inputs: inputs.clone(),
        })
        .operation(AlwaysFailsOp { name: "transcribe" })
        .operation(RecordingOp {
            name: "store",
            output: json!({}),
            inputs: inputs.clone(),
        })
        .build();

    let handle = coordinator
        .submit(
            JobSpec::new(json!({}))
                .stage(StageSpec::new("extract", "youtube-api", "extract"))
                .stage(StageSpec::new("transcribe", "whisper-api", "transcribe"))
                .stage(StageSpec::new("store", "storage", "store")),
        )
        .unwrap();

    let report = handle.wait().await;
    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(stage(&report, "extract").status, StageStatus::Success);
    assert_eq!(stage(&report, "transcribe").status, StageStatus::Failed);
    assert_eq!(stage(&report, "store").status, StageStatus::Skipped);
    assert_eq!(stage(&report, "store").attempts, 0);
    assert_eq!(inputs.lock().await.len(), 1, "store never ran");
}

#[tokio::test(start_paused = true)]
async fn concurrent_stages_overlap_in_time() {
    let coordinator = Coordinator::builder(test_registry())
        .operation(SleepyOp {
            name: "analyze_gemini",
            duration: Duration::from_secs(1),
        })
        .operation(SleepyOp {
            name: "analyze_openai",
            duration: Duration::from_secs(1),
        })
        .build();

    let start = tokio::time::Instant::now();
    let handle = coordinator
        .submit(JobSpec::new(json!({})).concurrent(vec![
            StageSpec::new("analyze_a", "gemini-api", "analyze_gemini"),
            StageSpec::new("analyze_b", "openai-api", "analyze_openai"),
        ]))
        .unwrap();

    let report = handle.wait().await;
    assert_eq!(report.status, JobStatus::Completed);
    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_millis(1_900),
        "stages should overlap, not run back to back: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn submit_rejects_bad_specs() {
    let inputs = Arc::new(Mutex::new(Vec::new()));
    let coordinator = Coordinator::builder(test_registry())
        .operation(RecordingOp {
            name: "extract",
            output: json!({}),
            inputs,
        })
        .build();

    let err = coordinator.submit(JobSpec::new(json!({}))).unwrap_err();
    assert!(matches!(err, SubmitError::EmptyJob));

    let err = coordinator
        .submit(
            JobSpec::new(json!({})).stage(StageSpec::new("extract", "youtube-api", "missing")),
        )
        .unwrap_err();
    assert!(matches!(err, SubmitError::UnknownOperation { .. }));

    let err = coordinator
        .submit(JobSpec::new(json!({})).stage(StageSpec::new("extract", "nope", "extract")))
        .unwrap_err();
    assert!(matches!(err, SubmitError::UnknownDependency { .. }));
}

#[tokio::test]
async fn events_trace_the_job_lifecycle() {
    let inputs = Arc::new(Mutex::new(Vec::new()));
    let coordinator = Coordinator::builder(test_registry())
        .operation(RecordingOp {
            name: "extract",
            output: json!({}),
            inputs: inputs.clone(),
        })
        .operation(RecordingOp {
            name: "store",
            output: json!({}),
            inputs,
        })
        .build();

    let mut events = coordinator.subscribe();
    let handle = coordinator
        .submit(
            JobSpec::new(json!({}))
                .stage(StageSpec::new("extract", "youtube-api", "extract"))
                .stage(StageSpec::new("store", "storage", "store")),
        )
        .unwrap();
    handle.wait().await;

    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        let finished = matches!(event, Event::JobFinished { .. });
        seen.push(event);
        if finished {
            break;
        }
    }

    assert!(matches!(seen.first(), Some(Event::JobStarted { .. })));
    let started = seen
        .iter()
        .filter(|e| matches!(e, Event::StageStarted { .. }))
        .count();
    let finished = seen
        .iter()
        .filter(|e| matches!(e, Event::StageFinished { .. }))
        .count();
    assert_eq!(started, 2);
    assert_eq!(finished, 2);
    match seen.last() {
        Some(Event::JobFinished { status, .. }) => assert_eq!(*status, JobStatus::Completed),
        other => panic!("expected JobFinished, got {:?}", other),
    }
}

#[tokio::test]
async fn status_is_queryable_by_id() {
    let inputs = Arc::new(Mutex::new(Vec::new()));
    let coordinator = Coordinator::builder(test_registry())
        .operation(RecordingOp {
            name: "extract",
            output: json!({}),
            inputs,
        })
        .build();

    let handle = coordinator
        .submit(JobSpec::new(json!({})).stage(StageSpec::new("extract", "youtube-api", "extract")))
        .unwrap();
    let id = handle.id();
    handle.wait().await;

    let report = coordinator.status(id).expect("job is known");
    assert_eq!(report.status, JobStatus::Completed);
    assert!(coordinator.status(outrigger::JobId(9_999)).is_none());
}
