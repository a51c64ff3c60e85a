//! Agent Orchestration & Messaging Layer
//!
//! Routes inbound natural-language requests to specialist agents, moves
//! messages between agents over a resilient A2A bus, caches URI-addressed
//! context resources and pushes results to live client connections.
//!
//! # Architecture
//!
//! - **IntentClassifier**: keyword classifier, text → [`Intent`]
//! - **AgentRouter**: intent → primary agent + two collaborators over the roster
//! - **ReliabilityManager**: Retry(CircuitBreaker(Timeout(call))) per endpoint
//! - **ResourceStore**: bounded URI cache with on-miss fetch and a closed tool table
//! - **MessageBus**: agent registry, secure send, broadcast, status
//! - **ConnectionHub**: per-user realtime channels
//! - **Coordinator**: lifecycle (startup, shutdown, health) and the request facade
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use orchestrator::{
//!     CannedExecutor, ChatRequest, Coordinator, CoordinatorDeps, HttpAgentTransport,
//!     InMemoryStore, OrchestratorConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let deps = CoordinatorDeps::new(
//!         Arc::new(HttpAgentTransport::default()),
//!         Arc::new(CannedExecutor::default()),
//!     )
//!     .with_store(Arc::new(InMemoryStore::default()));
//!
//!     let coordinator = Coordinator::new(OrchestratorConfig::default(), deps)?;
//!     coordinator.startup().await?;
//!
//!     let response = coordinator
//!         .handle_request(ChatRequest::new("user-1", "أريد تحليل السوق والمنافسين"))
//!         .await?;
//!     println!("{} answered: {}", response.primary_agent, response.content);
//!
//!     coordinator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod a2a;
pub mod agents;
pub mod collaborators;
pub mod config;
pub mod connections;
pub mod coordinator;
pub mod reliability;
pub mod resources;

pub use a2a::{
    message_id, AgentDescriptor, AgentStatusReport, AgentTransport, BroadcastSummary,
    DeliveryOutcome, HttpAgentTransport, MessageBus, MessageRecord, MessageStatus,
    NetworkStatus, WireEnvelope,
};
pub use agents::{default_roster, AgentId, AgentProfile, AgentRouter, Intent, IntentClassifier};
pub use collaborators::{
    CacheBackend, CannedExecutor, Collaborator, DurableStore, InMemoryCache, InMemoryStore,
    RecordFilter, TaskExecutor,
};
pub use config::{BusConfig, HubConfig, OrchestratorConfig, ResourceConfig};
pub use connections::{ConnectionHub, HubBroadcastSummary, MpscChannel, RealtimeChannel};
pub use coordinator::{
    ChatRequest, ChatResponse, Coordinator, CoordinatorDeps, CoordinatorState,
};
pub use reliability::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
    CircuitBreakerState, CircuitBreakerStats, HealthReport, HealthStatus, ReliabilityConfig,
    ReliabilityManager, RetryConfig, RetryPolicy, RetryStats, SubsystemHealth, TimeoutConfig,
};
pub use resources::{
    Resource, ResourceFetcher, ResourceKind, ResourceStore, ResourceSummary, ResourceUri,
    StoreResourceFetcher, Tool,
};

/// Result type for orchestration operations
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// System-wide error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestrationError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Circuit breaker open for {endpoint}")]
    CircuitOpen { endpoint: String },

    #[error("Transport to {endpoint} failed: {reason}")]
    Transport {
        endpoint: String,
        reason: String,
        status: Option<u16>,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid coordinator state transition: {from} -> {to}")]
    InvalidState {
        from: CoordinatorState,
        to: CoordinatorState,
    },

    #[error("Coordinator is {0}, not accepting requests")]
    NotReady(CoordinatorState),

    #[error("{name} failed: {reason}")]
    Collaborator { name: String, reason: String },

    #[error("Startup failed: {0}")]
    Startup(String),
}

impl OrchestrationError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn transport(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
            status: None,
        }
    }

    pub fn collaborator(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the remote peer answered but rejected the message
    pub fn is_remote_rejection(&self) -> bool {
        matches!(self, Self::Transport { status: Some(_), .. })
    }
}

impl From<CircuitBreakerError> for OrchestrationError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::Open { name } => Self::CircuitOpen { endpoint: name },
        }
    }
}
