//! Basic usage example for the Outrigger resilience orchestrator.
//!
//! This example demonstrates:
//! - Configuring per-dependency rate limits, breakers and retries
//! - Implementing operations that simulate flaky external APIs
//! - Submitting a job with sequential and concurrent stages
//! - Watching the job report and the dependency snapshots

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use outrigger::{
    CallError, Coordinator, DependencyConfig, DependencyRegistry, JobSpec, Operation,
    RegistryConfig, StageSpec,
};
use serde_json::{json, Value};

/// Simulated video extraction: always succeeds.
struct ExtractVideo;

#[async_trait]
impl Operation for ExtractVideo {
    fn name(&self) -> &'static str {
        "extract_video"
    }

    async fn call(&self, input: Value) -> Result<Value, CallError> {
        let video_id = input["video_id"].as_str().unwrap_or("unknown");
        println!("[extract] fetching metadata for {}", video_id);
        Ok(json!({"video_id": video_id, "duration_s": 212}))
    }
}

/// Simulated transcription: fails twice with a 503 before succeeding, to
/// show the retry loop absorbing transient upstream trouble.
struct Transcribe {
    calls: AtomicU32,
}

#[async_trait]
impl Operation for Transcribe {
    fn name(&self) -> &'static str {
        "transcribe"
    }

    async fn call(&self, input: Value) -> Result<Value, CallError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        if n < 2 {
            println!("[transcribe] attempt {} -> 503, will retry", n + 1);
            return Err(CallError::from_http_status(
                503,
                anyhow::anyhow!("service unavailable"),
            ));
        }
        println!("[transcribe] attempt {} -> ok", n + 1);
        Ok(json!({"video_id": input["video_id"], "transcript": "never gonna give you up"}))
    }
}

/// Simulated AI analysis: one provider works, the other rejects the API key.
struct Analyze {
    provider: &'static str,
    works: bool,
}

#[async_trait]
impl Operation for Analyze {
    fn name(&self) -> &'static str {
        self.provider
    }

    async fn call(&self, input: Value) -> Result<Value, CallError> {
        if !self.works {
            println!("[{}] 401 invalid api key", self.provider);
            return Err(CallError::from_http_status(
                401,
                anyhow::anyhow!("invalid api key"),
            ));
        }
        println!("[{}] analyzing transcript", self.provider);
        Ok(json!({
            "transcript": input["transcript"],
            "sentiment": "upbeat",
            "topics": ["music", "1987"],
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outrigger=info".into()),
        )
        .init();

    println!("=== Outrigger - Basic Example ===\n");

    let config = RegistryConfig::new()
        .dependency(
            "youtube-api",
            DependencyConfig::new(2.0, 4).breaker(5, Duration::from_secs(30)),
        )
        .dependency(
            "whisper-api",
            DependencyConfig::new(5.0, 5).retries(
                4,
                Duration::from_millis(100),
                Duration::from_secs(2),
            ),
        )
        .dependency("gemini-api", DependencyConfig::new(10.0, 10))
        .dependency("openai-api", DependencyConfig::new(10.0, 10));
    let registry = Arc::new(DependencyRegistry::from_config(config)?);

    let coordinator = Coordinator::builder(registry.clone())
        .operation(ExtractVideo)
        .operation(Transcribe {
            calls: AtomicU32::new(0),
        })
        .operation(Analyze {
            provider: "analyze_gemini",
            works: true,
        })
        .operation(Analyze {
            provider: "analyze_openai",
            works: false,
        })
        .build();

    let handle = coordinator.submit(
        JobSpec::new(json!({"video_id": "dQw4w9WgXcQ"}))
            .stage(StageSpec::new("extract", "youtube-api", "extract_video"))
            .stage(StageSpec::new("transcribe", "whisper-api", "transcribe"))
            .concurrent(vec![
                StageSpec::new("analyze_gemini", "gemini-api", "analyze_gemini").optional(),
                StageSpec::new("analyze_openai", "openai-api", "analyze_openai").optional(),
            ]),
    )?;

    let report = handle.wait().await;

    println!("\n--- Job {} finished: {:?} ---", report.id, report.status);
    for stage in &report.stages {
        println!(
            "  {:16} {:?} after {} attempt(s){}",
            stage.stage,
            stage.status,
            stage.attempts,
            stage
                .error
                .as_deref()
                .map(|e| format!(" - {}", e))
                .unwrap_or_default()
        );
    }

    println!("\n--- Dependency snapshots ---");
    for snap in registry.snapshot().await {
        println!(
            "  {:12} attempts={} failures={} breaker={:?} tokens={:.1}",
            snap.name, snap.attempts, snap.failures, snap.breaker_state, snap.tokens_available
        );
    }

    Ok(())
}
