//! Coordinator Integration Tests
//!
//! Lifecycle and request handling with fake collaborators:
//! - ready, degraded and fatal startup
//! - state transition guards and idempotent shutdown
//! - end-to-end routing, context assembly and fallback replies

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use orchestrator::{
    AgentTransport, CannedExecutor, ChatRequest, Collaborator, Coordinator, CoordinatorDeps,
    CoordinatorState, DurableStore, HealthStatus, InMemoryCache, InMemoryStore, Intent,
    MpscChannel, OrchestrationError, OrchestrationResult, OrchestratorConfig, RecordFilter,
    RetryConfig, TaskExecutor, WireEnvelope,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Transport that acknowledges, or refuses, every delivery
struct FakeTransport {
    reachable: bool,
}

#[async_trait]
impl Collaborator for FakeTransport {
    fn name(&self) -> &str {
        "transport"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl AgentTransport for FakeTransport {
    async fn deliver(
        &self,
        endpoint: &str,
        envelope: &WireEnvelope,
        _bearer: Option<&str>,
    ) -> OrchestrationResult<Value> {
        if self.reachable {
            Ok(json!({ "agent": envelope.to, "suggestion": "add a budget cap" }))
        } else {
            Err(OrchestrationError::transport(endpoint, "connection refused"))
        }
    }
}

/// Store whose connection always fails
struct UnreachableStore;

#[async_trait]
impl Collaborator for UnreachableStore {
    fn name(&self) -> &str {
        "store"
    }

    async fn connect(&self) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn close(&self) -> Result<()> {
        Err(anyhow!("never connected"))
    }

    async fn ping(&self) -> Result<()> {
        Err(anyhow!("connection refused"))
    }
}

#[async_trait]
impl DurableStore for UnreachableStore {
    async fn read(&self, _table: &str, _filter: &RecordFilter, _limit: usize) -> Result<Vec<Value>> {
        Err(anyhow!("connection refused"))
    }

    async fn write(&self, _table: &str, _record: Value) -> Result<Value> {
        Err(anyhow!("connection refused"))
    }
}

/// Executor that records the context it was given
#[derive(Default)]
struct RecordingExecutor {
    fail: bool,
    seen: Mutex<Option<Value>>,
}

#[async_trait]
impl Collaborator for RecordingExecutor {
    fn name(&self) -> &str {
        "executor"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn execute(&self, task: &str, context: &Value) -> Result<String> {
        *self.seen.lock() = Some(context.clone());
        if self.fail {
            return Err(anyhow!("model quota exceeded"));
        }
        Ok(format!("answer to: {task}"))
    }
}

/// Executor that accepts the task and never answers
struct StalledExecutor;

#[async_trait]
impl Collaborator for StalledExecutor {
    fn name(&self) -> &str {
        "executor"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        std::future::pending().await
    }
}

#[async_trait]
impl TaskExecutor for StalledExecutor {
    async fn execute(&self, _task: &str, _context: &Value) -> Result<String> {
        std::future::pending().await
    }
}

fn no_retry_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.reliability.retry = RetryConfig {
        max_retries: 0,
        base_delay_ms: 10,
        ..RetryConfig::default()
    };
    config
}

fn deps(reachable: bool) -> CoordinatorDeps {
    CoordinatorDeps::new(
        Arc::new(FakeTransport { reachable }),
        Arc::new(CannedExecutor::default()),
    )
}

#[tokio::test]
async fn test_market_analysis_end_to_end() -> Result<()> {
    let store = Arc::new(InMemoryStore::default());
    let coordinator = Coordinator::new(
        no_retry_config(),
        deps(true)
            .with_store(store.clone())
            .with_cache(Arc::new(InMemoryCache::default())),
    )?;
    assert_eq!(coordinator.startup().await?, CoordinatorState::Ready);

    let response = coordinator
        .handle_request(ChatRequest::new("user-1", "أريد تحليل السوق والمنافسين"))
        .await?;

    assert_eq!(response.intent, Intent::StrategicAnalysis);
    assert_eq!(response.primary_agent, "M1");
    assert_eq!(response.collaborators, vec!["M2", "M3"]);
    assert!(!response.fallback);
    assert!(response.content.contains("Strategic Analyst"));
    assert_eq!(store.table_len("conversations"), 1);

    coordinator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_context_includes_profile_and_user_resources() -> Result<()> {
    let store = Arc::new(InMemoryStore::default().with_table(
        "user_profiles",
        vec![json!({"user_id": "user-7", "company": "Nakhla Dates"})],
    ));
    let executor = Arc::new(RecordingExecutor::default());
    let deps = CoordinatorDeps::new(Arc::new(FakeTransport { reachable: true }), executor.clone())
        .with_store(store);

    let coordinator = Coordinator::new(no_retry_config(), deps)?;
    coordinator.startup().await?;
    coordinator
        .handle_request(ChatRequest::new("user-7", "What strategy should we follow?"))
        .await?;

    let context = executor.seen.lock().clone().expect("executor was called");
    assert_eq!(context["intent"], "strategic_analysis");
    assert_eq!(context["agent"]["id"], "M1");
    assert_eq!(context["user_profile"]["records"][0]["company"], "Nakhla Dates");
    assert_eq!(context["campaigns"]["count"], 0);
    assert_eq!(context["resources"]["schema://agents/roster"]["count"], 5);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_store_degrades_startup() -> Result<()> {
    let coordinator = Coordinator::new(
        no_retry_config(),
        deps(true).with_store(Arc::new(UnreachableStore)),
    )?;

    assert_eq!(coordinator.startup().await?, CoordinatorState::Degraded);
    assert_eq!(coordinator.state(), CoordinatorState::Degraded);

    let report = coordinator.health_check().await;
    assert_eq!(report.state, CoordinatorState::Degraded);
    assert!(matches!(
        report.subsystems["store"].status,
        HealthStatus::Unavailable { .. }
    ));
    assert_eq!(report.subsystems["cache"].status, HealthStatus::NotConfigured);
    assert!(report.subsystems["a2a"].status.is_healthy());

    // Requests are still served while degraded
    let response = coordinator
        .handle_request(ChatRequest::new("user-1", "Show me the analytics"))
        .await?;
    assert!(!response.fallback);
    assert_eq!(response.primary_agent, "M5");
    Ok(())
}

#[tokio::test]
async fn test_invalid_roster_is_fatal() -> Result<()> {
    let mut config = no_retry_config();
    config.agents.truncate(2);
    let coordinator = Coordinator::new(config, deps(true))?;

    let err = coordinator.startup().await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Startup(_)));
    assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    assert!(coordinator.bus().is_none());
    Ok(())
}

#[tokio::test]
async fn test_startup_twice_is_rejected() -> Result<()> {
    let coordinator = Coordinator::new(no_retry_config(), deps(true))?;
    coordinator.startup().await?;

    let err = coordinator.startup().await.unwrap_err();
    assert_eq!(
        err,
        OrchestrationError::InvalidState {
            from: CoordinatorState::Ready,
            to: CoordinatorState::Starting,
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_shutdown_collects_errors_once() -> Result<()> {
    let coordinator = Coordinator::new(
        no_retry_config(),
        deps(true).with_store(Arc::new(UnreachableStore)),
    )?;
    coordinator.startup().await?;

    let (channel, _rx) = MpscChannel::pair();
    let hub = coordinator.hub().expect("hub exists after startup");
    hub.connect("user-1", Arc::new(channel)).await;

    let errors = coordinator.shutdown().await;
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        OrchestrationError::Collaborator { name, .. } if name == "store"
    ));
    assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    assert_eq!(hub.connection_count(), 0);

    assert!(coordinator.shutdown().await.is_empty());
    let err = coordinator
        .handle_request(ChatRequest::new("user-1", "hello"))
        .await
        .unwrap_err();
    assert_eq!(err, OrchestrationError::NotReady(CoordinatorState::Stopped));
    Ok(())
}

#[tokio::test]
async fn test_executor_failure_returns_fallback() -> Result<()> {
    let executor = Arc::new(RecordingExecutor {
        fail: true,
        ..RecordingExecutor::default()
    });
    let deps = CoordinatorDeps::new(Arc::new(FakeTransport { reachable: true }), executor);
    let coordinator = Coordinator::new(no_retry_config(), deps)?;
    coordinator.startup().await?;

    let (channel, mut rx) = MpscChannel::pair();
    coordinator
        .hub()
        .expect("hub exists after startup")
        .connect("user-1", Arc::new(channel))
        .await;
    rx.recv().await.expect("welcome frame");

    let response = coordinator
        .handle_request(ChatRequest::new("user-1", "Boost the campaign ROI"))
        .await?;

    assert!(response.fallback);
    assert_eq!(response.intent, Intent::CampaignOptimization);
    assert_eq!(response.primary_agent, "M3");
    assert!(!response.content.contains("quota"));
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_unreachable_collaborators_degrade_collaboration() -> Result<()> {
    let coordinator = Coordinator::new(no_retry_config(), deps(false))?;
    coordinator.startup().await?;

    let response = coordinator
        .handle_request(ChatRequest::new("user-1", "Draft a blog post").with_collaboration())
        .await?;

    assert!(!response.fallback);
    assert!(response.degraded_collaboration);
    assert!(response.collaborator_responses.is_empty());
    assert_eq!(response.primary_agent, "M4");

    let bus = coordinator.bus().expect("bus exists after startup");
    assert_eq!(bus.queue_len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_collaboration_replies_are_returned() -> Result<()> {
    let coordinator = Coordinator::new(no_retry_config(), deps(true))?;
    coordinator.startup().await?;

    let response = coordinator
        .handle_request(ChatRequest::new("user-1", "Draft a blog post").with_collaboration())
        .await?;

    assert!(!response.degraded_collaboration);
    let responders: Vec<_> = response.collaborator_responses.keys().cloned().collect();
    assert_eq!(responders, vec!["M1", "M2"]);
    assert_eq!(response.collaborator_responses["M1"]["agent"], "M1");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stalled_executor_times_out_to_fallback() -> Result<()> {
    let mut config = no_retry_config();
    config.reliability.timeout.collaborator_timeout_ms = 2_000;
    config.reliability.timeout.health_check_timeout_ms = 500;
    let deps = CoordinatorDeps::new(Arc::new(FakeTransport { reachable: true }), Arc::new(StalledExecutor));
    let coordinator = Coordinator::new(config, deps)?;
    coordinator.startup().await?;

    let started = tokio::time::Instant::now();
    let response = coordinator
        .handle_request(ChatRequest::new("user-1", "Show me the analytics"))
        .await?;
    assert!(response.fallback);
    assert!(started.elapsed() < Duration::from_secs(3));

    // A close that never returns is reported instead of blocking shutdown
    let errors = coordinator.shutdown().await;
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        OrchestrationError::Collaborator { name, .. } if name == "executor"
    ));
    Ok(())
}
