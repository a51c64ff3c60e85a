//! Protocol coordinator
//!
//! Owns subsystem lifecycle and is the facade handed to the HTTP/WebSocket
//! layer. Construction and startup are separate: `new` only validates
//! configuration, `startup` builds the messaging session and connects
//! collaborators. `handle_request` is the one place where internal errors
//! are turned into a user-facing fallback reply.

use chrono::{DateTime, Utc};
use common::OperationTimer;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::a2a::{AgentTransport, MessageBus};
use crate::agents::{AgentId, AgentProfile, AgentRouter, Intent, IntentClassifier};
use crate::collaborators::{CacheBackend, Collaborator, DurableStore, TaskExecutor};
use crate::config::OrchestratorConfig;
use crate::connections::ConnectionHub;
use crate::reliability::{
    bounded_call, CircuitBreakerState, HealthReport, HealthStatus, ReliabilityManager,
    SubsystemHealth,
};
use crate::resources::{ResourceFetcher, ResourceStore, StoreResourceFetcher};
use crate::{OrchestrationError, OrchestrationResult};

const CONVERSATIONS_TABLE: &str = "conversations";
const FALLBACK_REPLY: &str =
    "Sorry, your request could not be completed right now. Please try again shortly.";

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Uninitialized,
    Starting,
    Ready,
    /// Running with at least one collaborator unavailable
    Degraded,
    ShuttingDown,
    Stopped,
}

impl CoordinatorState {
    pub fn accepts_requests(&self) -> bool {
        matches!(self, CoordinatorState::Ready | CoordinatorState::Degraded)
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CoordinatorState::Uninitialized => "uninitialized",
            CoordinatorState::Starting => "starting",
            CoordinatorState::Ready => "ready",
            CoordinatorState::Degraded => "degraded",
            CoordinatorState::ShuttingDown => "shutting_down",
            CoordinatorState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// External collaborators supplied by the embedding process
pub struct CoordinatorDeps {
    pub transport: Arc<dyn AgentTransport>,
    pub executor: Arc<dyn TaskExecutor>,
    pub store: Option<Arc<dyn DurableStore>>,
    pub cache: Option<Arc<dyn CacheBackend>>,
    /// Overrides the store-backed resource fetcher
    pub fetcher: Option<Arc<dyn ResourceFetcher>>,
}

impl CoordinatorDeps {
    pub fn new(transport: Arc<dyn AgentTransport>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            transport,
            executor,
            store: None,
            cache: None,
            fetcher: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }
}

/// Inbound chat message from a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub text: String,
    /// Ask the two collaborator agents for input over the bus
    #[serde(default)]
    pub collaborate: bool,
}

impl ChatRequest {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: None,
            text: text.into(),
            collaborate: false,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_collaboration(mut self) -> Self {
        self.collaborate = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub intent: Intent,
    pub primary_agent: AgentId,
    pub agent_name: String,
    pub collaborators: Vec<AgentId>,
    /// Replies from collaborators that answered
    #[serde(default)]
    pub collaborator_responses: BTreeMap<AgentId, Value>,
    /// At least one solicited collaborator could not be reached
    pub degraded_collaboration: bool,
    /// `content` is the generic fallback reply, not an agent answer
    pub fallback: bool,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Mandatory subsystems built by `startup`
struct Session {
    router: AgentRouter,
    bus: MessageBus,
    hub: ConnectionHub,
    resources: ResourceStore,
}

pub struct Coordinator {
    config: OrchestratorConfig,
    deps: CoordinatorDeps,
    classifier: IntentClassifier,
    state: RwLock<CoordinatorState>,
    session: OnceLock<Session>,
}

impl Coordinator {
    pub fn new(config: OrchestratorConfig, deps: CoordinatorDeps) -> OrchestrationResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            deps,
            classifier: IntentClassifier::new(),
            state: RwLock::new(CoordinatorState::Uninitialized),
            session: OnceLock::new(),
        })
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn router(&self) -> Option<&AgentRouter> {
        self.session.get().map(|s| &s.router)
    }

    pub fn bus(&self) -> Option<&MessageBus> {
        self.session.get().map(|s| &s.bus)
    }

    pub fn hub(&self) -> Option<&ConnectionHub> {
        self.session.get().map(|s| &s.hub)
    }

    pub fn resources(&self) -> Option<&ResourceStore> {
        self.session.get().map(|s| &s.resources)
    }

    /// Build the messaging session, then connect collaborators.
    ///
    /// Session failure is fatal and leaves the coordinator `Stopped`.
    /// Collaborator failures only downgrade the result to `Degraded`.
    pub async fn startup(&self) -> OrchestrationResult<CoordinatorState> {
        self.transition(&[CoordinatorState::Uninitialized], CoordinatorState::Starting)?;
        info!(network_id = %self.config.network_id, "Starting coordinator");

        let session = match self.build_session().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Messaging session failed to start");
                self.set_state(CoordinatorState::Stopped);
                return Err(OrchestrationError::Startup(e.to_string()));
            }
        };
        if self.session.set(session).is_err() {
            self.set_state(CoordinatorState::Stopped);
            return Err(OrchestrationError::Startup("session already initialized".into()));
        }

        let limit = self.config.reliability.timeout.health_check_timeout();
        let (transport, executor, store, cache) = tokio::join!(
            bounded(limit, self.deps.transport.connect()),
            bounded(limit, self.deps.executor.connect()),
            connect_optional(self.deps.store.as_deref(), limit),
            connect_optional(self.deps.cache.as_deref(), limit),
        );

        let mut unavailable = Vec::new();
        for (name, status) in [
            ("transport", &transport),
            ("executor", &executor),
            ("store", &store),
            ("cache", &cache),
        ] {
            if let HealthStatus::Unavailable { reason } = status {
                warn!(collaborator = name, reason = %reason, "Collaborator unavailable");
                unavailable.push(name);
            }
        }

        let state = if unavailable.is_empty() {
            CoordinatorState::Ready
        } else {
            CoordinatorState::Degraded
        };
        self.set_state(state);
        info!(state = %state, unavailable = ?unavailable, "Coordinator started");
        Ok(state)
    }

    /// Release every collaborator concurrently and return the errors met on the way.
    /// Calling it again after the first shutdown is a no-op.
    pub async fn shutdown(&self) -> Vec<OrchestrationError> {
        {
            let mut state = self.state.write();
            if matches!(
                *state,
                CoordinatorState::ShuttingDown | CoordinatorState::Stopped
            ) {
                return Vec::new();
            }
            *state = CoordinatorState::ShuttingDown;
        }
        info!("Shutting down coordinator");

        if let Some(hub) = self.hub() {
            for user_id in hub.connected_users() {
                hub.disconnect(&user_id).await;
            }
        }

        let limit = self.config.reliability.timeout.health_check_timeout();
        let (transport, executor, store, cache) = tokio::join!(
            close_one(Some(self.deps.transport.as_ref()), limit),
            close_one(Some(self.deps.executor.as_ref()), limit),
            close_one(self.deps.store.as_deref(), limit),
            close_one(self.deps.cache.as_deref(), limit),
        );
        let errors: Vec<OrchestrationError> = [transport, executor, store, cache]
            .into_iter()
            .flatten()
            .collect();

        self.set_state(CoordinatorState::Stopped);
        info!(errors = errors.len(), "Coordinator stopped");
        errors
    }

    /// Snapshot of every subsystem; collaborators are pinged live
    pub async fn health_check(&self) -> HealthReport {
        let mut subsystems = BTreeMap::new();

        match self.session.get() {
            Some(session) => {
                subsystems.insert("a2a".to_string(), bus_health(&session.bus));
                subsystems.insert(
                    "resources".to_string(),
                    SubsystemHealth::healthy(json!({
                        "cached": session.resources.len(),
                        "capacity": session.resources.capacity(),
                    })),
                );
                subsystems.insert(
                    "connections".to_string(),
                    SubsystemHealth::healthy(json!({
                        "connected_users": session.hub.connection_count(),
                    })),
                );
            }
            None => {
                for name in ["a2a", "resources", "connections"] {
                    subsystems.insert(
                        name.to_string(),
                        SubsystemHealth::with_status(HealthStatus::Unavailable {
                            reason: "not started".into(),
                        }),
                    );
                }
            }
        }

        let limit = self.config.reliability.timeout.health_check_timeout();
        let (transport, executor, store, cache) = tokio::join!(
            bounded(limit, self.deps.transport.ping()),
            bounded(limit, self.deps.executor.ping()),
            ping_optional(self.deps.store.as_deref(), limit),
            ping_optional(self.deps.cache.as_deref(), limit),
        );
        for (name, status) in [
            ("transport", transport),
            ("executor", executor),
            ("store", store),
            ("cache", cache),
        ] {
            subsystems.insert(name.to_string(), SubsystemHealth::with_status(status));
        }

        HealthReport {
            state: self.state(),
            timestamp: Utc::now(),
            network_id: self.config.network_id.clone(),
            subsystems,
        }
    }

    /// Classify, route, build context, run the primary agent and deliver the answer.
    ///
    /// Only lifecycle and input errors are returned; anything that goes wrong
    /// while producing the answer yields a fallback response instead.
    pub async fn handle_request(&self, request: ChatRequest) -> OrchestrationResult<ChatResponse> {
        let state = self.state();
        if !state.accepts_requests() {
            return Err(OrchestrationError::NotReady(state));
        }
        let session = self
            .session
            .get()
            .ok_or(OrchestrationError::NotReady(state))?;

        if request.user_id.trim().is_empty() {
            return Err(OrchestrationError::Validation("user_id must not be empty".into()));
        }
        if request.text.trim().is_empty() {
            return Err(OrchestrationError::Validation("text must not be empty".into()));
        }

        let intent = self.classifier.classify(&request.text);
        let primary_id = session.router.select_primary(intent);
        let primary = session
            .router
            .profile(primary_id)
            .ok_or_else(|| OrchestrationError::not_found("agent", primary_id.as_str()))?;
        let collaborators = session.router.get_collaborators(primary_id);
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut timer = OperationTimer::new("handle_request");
        timer.add_field("user_id", &request.user_id);
        timer.add_field("intent", intent.as_str());
        timer.add_field("agent_id", &primary.id);

        let result = self
            .respond(session, &request, intent, primary, &collaborators, &session_id)
            .await;
        timer.finish_with_result(&result);

        Ok(result.unwrap_or_else(|_| ChatResponse {
            content: FALLBACK_REPLY.to_string(),
            intent,
            primary_agent: primary.id.clone(),
            agent_name: primary.name.clone(),
            collaborators,
            collaborator_responses: BTreeMap::new(),
            degraded_collaboration: false,
            fallback: true,
            session_id,
            timestamp: Utc::now(),
        }))
    }

    async fn respond(
        &self,
        session: &Session,
        request: &ChatRequest,
        intent: Intent,
        primary: &AgentProfile,
        collaborators: &[AgentId],
        session_id: &str,
    ) -> OrchestrationResult<ChatResponse> {
        let context = self
            .build_context(session, request, intent, primary, collaborators, session_id)
            .await;

        let limit = self.config.reliability.timeout.collaborator_timeout();
        let execution = self.deps.executor.execute(&request.text, &context);
        let content = bounded_call(limit, "task execution", execution)
            .await
            .map_err(|e| OrchestrationError::collaborator(self.deps.executor.name(), e))?;

        let (collaborator_responses, degraded_collaboration) = if request.collaborate {
            self.solicit(session, request, intent, primary, collaborators, &content)
                .await
        } else {
            (BTreeMap::new(), false)
        };

        let timestamp = Utc::now();
        self.persist(request, intent, primary, &content, session_id, timestamp)
            .await;

        let frame = json!({
            "type": "agent_response",
            "agent_id": primary.id,
            "agent_name": primary.name,
            "intent": intent,
            "content": content,
            "session_id": session_id,
            "timestamp": timestamp.to_rfc3339(),
        });
        session.hub.send_personal(&request.user_id, &frame).await;

        Ok(ChatResponse {
            content,
            intent,
            primary_agent: primary.id.clone(),
            agent_name: primary.name.clone(),
            collaborators: collaborators.to_vec(),
            collaborator_responses,
            degraded_collaboration,
            fallback: false,
            session_id: session_id.to_string(),
            timestamp,
        })
    }

    async fn build_context(
        &self,
        session: &Session,
        request: &ChatRequest,
        intent: Intent,
        primary: &AgentProfile,
        collaborators: &[AgentId],
        session_id: &str,
    ) -> Value {
        let lookups = primary
            .context_resources
            .iter()
            .map(|uri| async move { (uri, session.resources.get(uri).await) });
        let user_profile_uri = format!("data://store/user_profiles/{}", request.user_id);
        let campaigns_uri = format!("data://store/campaigns/{}", request.user_id);

        let (loaded, user_profile, campaigns) = tokio::join!(
            join_all(lookups),
            session.resources.get(&user_profile_uri),
            session.resources.get(&campaigns_uri),
        );

        let resources: Map<String, Value> = loaded
            .into_iter()
            .filter_map(|(uri, payload)| payload.map(|p| (uri.clone(), p)))
            .collect();

        json!({
            "user_id": request.user_id,
            "session_id": session_id,
            "intent": intent,
            "agent": {
                "id": primary.id,
                "name": primary.name,
                "role": primary.role,
                "capabilities": primary.capabilities,
            },
            "collaborators": collaborators,
            "resources": resources,
            "user_profile": user_profile.unwrap_or(Value::Null),
            "campaigns": campaigns.unwrap_or(Value::Null),
        })
    }

    async fn solicit(
        &self,
        session: &Session,
        request: &ChatRequest,
        intent: Intent,
        primary: &AgentProfile,
        collaborators: &[AgentId],
        draft: &str,
    ) -> (BTreeMap<AgentId, Value>, bool) {
        let payload = json!({
            "type": "collaboration_request",
            "intent": intent,
            "task": request.text,
            "user_id": request.user_id,
            "primary_response": draft,
        });

        let sends = collaborators.iter().map(|id| {
            session
                .bus
                .send_secure(&primary.id, id, payload.clone(), self.config.bus.require_auth)
        });
        let outcomes = join_all(sends).await;

        let mut responses = BTreeMap::new();
        let mut degraded = false;
        for (id, outcome) in collaborators.iter().zip(outcomes) {
            match outcome {
                Ok(reply) => {
                    responses.insert(id.clone(), reply);
                }
                Err(e) => {
                    warn!(agent_id = %id, error = %e, "Collaborator did not respond");
                    degraded = true;
                }
            }
        }
        (responses, degraded)
    }

    async fn persist(
        &self,
        request: &ChatRequest,
        intent: Intent,
        primary: &AgentProfile,
        content: &str,
        session_id: &str,
        at: DateTime<Utc>,
    ) {
        let Some(store) = &self.deps.store else {
            return;
        };

        let record = json!({
            "user_id": request.user_id,
            "session_id": session_id,
            "agent_id": primary.id,
            "intent": intent,
            "message": request.text,
            "response": content,
            "timestamp": at.to_rfc3339(),
        });
        let limit = self.config.reliability.timeout.collaborator_timeout();
        let write = store.write(CONVERSATIONS_TABLE, record);
        if let Err(e) = bounded_call(limit, "conversation write", write).await {
            warn!(user_id = %request.user_id, error = %e, "Conversation not persisted");
        }
    }

    async fn build_session(&self) -> OrchestrationResult<Session> {
        let router = AgentRouter::new(self.config.agents.clone())?;

        let bus = MessageBus::new(
            self.config.network_id.clone(),
            self.config.bus.clone(),
            Arc::clone(&self.deps.transport),
            ReliabilityManager::new(self.config.reliability.clone()),
            self.deps.cache.clone(),
        );
        for profile in router.roster() {
            bus.register_agent(&profile.id, &profile.endpoint, profile.capabilities.clone(), None)
                .await?;
        }

        let fetcher = match &self.deps.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => Arc::new(StoreResourceFetcher::new(
                self.deps.store.clone(),
                router.roster().to_vec(),
            )),
        };
        let timeouts = &self.config.reliability.timeout;
        let resources = ResourceStore::new(
            &self.config.resources,
            fetcher,
            self.deps.store.clone(),
            self.deps.cache.clone(),
        )?
        .with_call_timeout(timeouts.collaborator_timeout());
        let hub = ConnectionHub::new(self.config.hub.clone())
            .with_send_timeout(timeouts.push_timeout());

        Ok(Session {
            router,
            bus,
            hub,
            resources,
        })
    }

    fn transition(
        &self,
        allowed: &[CoordinatorState],
        to: CoordinatorState,
    ) -> OrchestrationResult<()> {
        let mut state = self.state.write();
        if !allowed.contains(&*state) {
            return Err(OrchestrationError::InvalidState { from: *state, to });
        }
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: CoordinatorState) {
        *self.state.write() = to;
    }
}

fn bus_health(bus: &MessageBus) -> SubsystemHealth {
    let network = bus.network_status();
    let open: Vec<String> = bus
        .breaker_states()
        .into_iter()
        .filter(|(_, stats)| stats.current_state == CircuitBreakerState::Open)
        .map(|(endpoint, _)| endpoint)
        .collect();

    let details = json!({
        "registered_agents": network.registered_agents,
        "active_agents": network.active_agents,
        "message_queue_size": network.message_queue_size,
        "open_circuits": open,
    });
    let status = if open.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded {
            reason: format!("{} open circuit(s)", open.len()),
        }
    };
    SubsystemHealth { status, details }
}

async fn bounded<F>(limit: Duration, operation: F) -> HealthStatus
where
    F: Future<Output = anyhow::Result<()>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(Ok(())) => HealthStatus::Healthy,
        Ok(Err(e)) => HealthStatus::Unavailable {
            reason: e.to_string(),
        },
        Err(_) => HealthStatus::Unavailable {
            reason: format!("timed out after {}ms", limit.as_millis()),
        },
    }
}

async fn connect_optional<C>(collaborator: Option<&C>, limit: Duration) -> HealthStatus
where
    C: Collaborator + ?Sized,
{
    match collaborator {
        Some(collaborator) => bounded(limit, collaborator.connect()).await,
        None => HealthStatus::NotConfigured,
    }
}

async fn ping_optional<C>(collaborator: Option<&C>, limit: Duration) -> HealthStatus
where
    C: Collaborator + ?Sized,
{
    match collaborator {
        Some(collaborator) => bounded(limit, collaborator.ping()).await,
        None => HealthStatus::NotConfigured,
    }
}

async fn close_one<C>(collaborator: Option<&C>, limit: Duration) -> Option<OrchestrationError>
where
    C: Collaborator + ?Sized,
{
    let collaborator = collaborator?;
    match bounded_call(limit, collaborator.name(), collaborator.close()).await {
        Ok(()) => None,
        Err(e) => {
            warn!(collaborator = %collaborator.name(), error = %e, "Collaborator failed to close");
            Some(OrchestrationError::collaborator(collaborator.name(), e))
        }
    }
}
