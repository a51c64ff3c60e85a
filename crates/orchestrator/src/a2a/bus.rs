use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::message::{short_digest, wire_timestamp};
use super::{AgentTransport, MessageRecord, MessageStatus};
use crate::collaborators::CacheBackend;
use crate::config::BusConfig;
use crate::reliability::{bounded_call, CircuitBreakerStats, ReliabilityManager};
use crate::{OrchestrationError, OrchestrationResult};

/// Reachability of a registered agent, updated by sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAvailability {
    Active,
    Unreachable,
}

/// A registered agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub endpoint: String,
    pub capabilities: BTreeSet<String>,
    pub status: AgentAvailability,
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// Result of one target in a broadcast
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub agent_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastSummary {
    pub broadcast_id: String,
    pub from: String,
    pub timestamp: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<DeliveryOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusReport {
    pub agent: AgentDescriptor,
    pub messages_sent: usize,
    pub messages_received: usize,
    pub last_message: Option<MessageRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub network_id: String,
    pub registered_agents: usize,
    pub agents: Vec<String>,
    pub message_queue_size: usize,
    pub active_agents: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Agent registry plus secure addressed messaging.
///
/// Registry order is registration order; re-registering an agent keeps its
/// slot. The message queue is bounded only by `cleanup`, which also runs
/// automatically every `cleanup_every` sends.
pub struct MessageBus {
    network_id: String,
    config: BusConfig,
    agents: RwLock<Vec<AgentDescriptor>>,
    queue: Mutex<VecDeque<MessageRecord>>,
    transport: Arc<dyn AgentTransport>,
    reliability: ReliabilityManager,
    cache: Option<Arc<dyn CacheBackend>>,
    sends: AtomicU64,
    last_activity: Mutex<Option<DateTime<Utc>>>,
}

impl MessageBus {
    pub fn new(
        network_id: impl Into<String>,
        config: BusConfig,
        transport: Arc<dyn AgentTransport>,
        reliability: ReliabilityManager,
        cache: Option<Arc<dyn CacheBackend>>,
    ) -> Self {
        Self {
            network_id: network_id.into(),
            config,
            agents: RwLock::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            transport,
            reliability,
            cache,
            sends: AtomicU64::new(0),
            last_activity: Mutex::new(None),
        }
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register or overwrite an agent. The endpoint must be an absolute http(s) URL.
    pub async fn register_agent(
        &self,
        id: &str,
        endpoint: &str,
        capabilities: Vec<String>,
        auth_token: Option<String>,
    ) -> OrchestrationResult<AgentDescriptor> {
        if id.trim().is_empty() {
            return Err(OrchestrationError::Validation("agent id must not be empty".into()));
        }
        validate_endpoint(endpoint)?;

        let descriptor = AgentDescriptor {
            id: id.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            capabilities: capabilities.into_iter().collect(),
            status: AgentAvailability::Active,
            last_seen: Utc::now(),
            auth_token,
            metadata: json!({ "network_id": self.network_id }),
        };

        {
            let mut agents = self.agents.write();
            match agents.iter_mut().find(|a| a.id == id) {
                Some(existing) => *existing = descriptor.clone(),
                None => agents.push(descriptor.clone()),
            }
        }
        info!(agent_id = %id, endpoint = %descriptor.endpoint, "Agent registered");

        if let Some(cache) = &self.cache {
            let mirrored = serde_json::to_value(&descriptor).unwrap_or(Value::Null);
            let key = format!("agent:{id}");
            let limit = self.reliability.config().timeout.collaborator_timeout();
            let mirror = cache.set(&key, mirrored, Some(self.config.registry_cache_ttl()));
            if let Err(e) = bounded_call(limit, "registry mirror", mirror).await {
                debug!(agent_id = %id, error = %e, "Agent registration not mirrored to cache");
            }
        }

        Ok(descriptor)
    }

    /// Send `payload` from `from` to agent `to`, returning the agent's JSON reply.
    ///
    /// The message is queued before delivery whatever the outcome.
    pub async fn send_secure(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        require_auth: bool,
    ) -> OrchestrationResult<Value> {
        let (endpoint, token) = {
            let agents = self.agents.read();
            let target = agents
                .iter()
                .find(|a| a.id == to)
                .ok_or_else(|| OrchestrationError::not_found("agent", to))?;
            (target.endpoint.clone(), target.auth_token.clone())
        };

        let now = Utc::now();
        let record = MessageRecord::new(from, to, payload, now);
        let message_id = record.id.clone();
        let envelope = record.envelope();
        self.enqueue(record, now);

        let bearer = if require_auth { token.as_deref() } else { None };
        let transport = self.transport.as_ref();
        let endpoint_ref = endpoint.as_str();
        let envelope_ref = &envelope;

        let result = self
            .reliability
            .execute(endpoint_ref, move || {
                transport.deliver(endpoint_ref, envelope_ref, bearer)
            })
            .await;

        let status = match &result {
            Ok(_) => MessageStatus::Delivered,
            Err(e) if e.is_remote_rejection() => MessageStatus::Failed,
            Err(_) => MessageStatus::Error,
        };
        self.set_status(&message_id, status);
        self.mark_agent(to, status == MessageStatus::Delivered);

        match &result {
            Ok(_) => debug!(message_id = %message_id, from = %from, to = %to, "Message delivered"),
            Err(e) => warn!(
                message_id = %message_id,
                from = %from,
                to = %to,
                status = %status,
                error = %e,
                "Message delivery failed"
            ),
        }

        result
    }

    /// Send `payload` to every other registered agent concurrently
    pub async fn broadcast(&self, from: &str, payload: Value) -> BroadcastSummary {
        let targets: Vec<String> = self
            .agents
            .read()
            .iter()
            .filter(|a| a.id != from)
            .map(|a| a.id.clone())
            .collect();

        let timestamp = wire_timestamp(Utc::now());
        let broadcast_id = short_digest(&[from, &timestamp]);

        let sends = targets.iter().map(|to| {
            self.send_secure(from, to, payload.clone(), self.config.require_auth)
        });
        let outcomes = join_all(sends).await;

        let results: Vec<DeliveryOutcome> = targets
            .into_iter()
            .zip(outcomes)
            .map(|(agent_id, outcome)| match outcome {
                Ok(response) => DeliveryOutcome {
                    agent_id,
                    success: true,
                    response: Some(response),
                    error: None,
                },
                Err(e) => DeliveryOutcome {
                    agent_id,
                    success: false,
                    response: None,
                    error: Some(e.to_string()),
                },
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            broadcast_id = %broadcast_id,
            from = %from,
            total = results.len(),
            succeeded,
            "Broadcast completed"
        );

        BroadcastSummary {
            broadcast_id,
            from: from.to_string(),
            timestamp,
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }

    /// Descriptor plus traffic counters over the most recent queue window
    pub fn get_agent_status(&self, id: &str) -> OrchestrationResult<AgentStatusReport> {
        let agent = self
            .agents
            .read()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| OrchestrationError::not_found("agent", id))?;

        let queue = self.queue.lock();
        let window_start = queue.len().saturating_sub(self.config.status_window);
        let window = queue.range(window_start..);

        let mut messages_sent = 0;
        let mut messages_received = 0;
        let mut last_message = None;
        for record in window {
            let sent = record.from == id;
            let received = record.to == id;
            messages_sent += usize::from(sent);
            messages_received += usize::from(received);
            if sent || received {
                last_message = Some(record);
            }
        }

        Ok(AgentStatusReport {
            agent,
            messages_sent,
            messages_received,
            last_message: last_message.cloned(),
        })
    }

    /// Keep the newest `max_size` queue entries; returns how many were evicted
    pub fn cleanup(&self, max_size: usize) -> usize {
        let mut queue = self.queue.lock();
        let excess = queue.len().saturating_sub(max_size);
        queue.drain(..excess);
        if excess > 0 {
            debug!(evicted = excess, remaining = queue.len(), "Message queue cleaned up");
        }
        excess
    }

    pub fn network_status(&self) -> NetworkStatus {
        let agents = self.agents.read();
        NetworkStatus {
            network_id: self.network_id.clone(),
            registered_agents: agents.len(),
            agents: agents.iter().map(|a| a.id.clone()).collect(),
            message_queue_size: self.queue.lock().len(),
            active_agents: agents
                .iter()
                .filter(|a| a.status == AgentAvailability::Active)
                .count(),
            last_activity: *self.last_activity.lock(),
        }
    }

    pub fn agents(&self) -> Vec<AgentDescriptor> {
        self.agents.read().clone()
    }

    pub fn agent(&self, id: &str) -> Option<AgentDescriptor> {
        self.agents.read().iter().find(|a| a.id == id).cloned()
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.queue.lock().iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn breaker_states(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.reliability.breaker_states()
    }

    fn enqueue(&self, record: MessageRecord, at: DateTime<Utc>) {
        self.queue.lock().push_back(record);
        *self.last_activity.lock() = Some(at);

        let sent = self.sends.fetch_add(1, Ordering::Relaxed) + 1;
        if sent % self.config.cleanup_every == 0 {
            self.cleanup(self.config.max_queue_size);
        }
    }

    fn set_status(&self, message_id: &str, status: MessageStatus) {
        let mut queue = self.queue.lock();
        // Entry may already be gone if cleanup ran during delivery
        if let Some(record) = queue.iter_mut().rev().find(|r| r.id == message_id) {
            record.status = status;
        }
    }

    fn mark_agent(&self, id: &str, delivered: bool) {
        let mut agents = self.agents.write();
        if let Some(agent) = agents.iter_mut().find(|a| a.id == id) {
            if delivered {
                agent.status = AgentAvailability::Active;
                agent.last_seen = Utc::now();
            } else {
                agent.status = AgentAvailability::Unreachable;
            }
        }
    }
}

fn validate_endpoint(endpoint: &str) -> OrchestrationResult<()> {
    let url = Url::parse(endpoint).map_err(|e| {
        OrchestrationError::Validation(format!("invalid agent endpoint {endpoint:?}: {e}"))
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(OrchestrationError::Validation(format!(
            "agent endpoint must be an absolute http(s) URL: {endpoint:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Collaborator, InMemoryCache};
    use crate::a2a::WireEnvelope;
    use crate::reliability::ReliabilityConfig;
    use async_trait::async_trait;

    /// Transport that acknowledges every delivery without network I/O
    struct AckTransport;

    #[async_trait]
    impl Collaborator for AckTransport {
        fn name(&self) -> &str {
            "ack"
        }

        async fn connect(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl AgentTransport for AckTransport {
        async fn deliver(
            &self,
            _endpoint: &str,
            envelope: &WireEnvelope,
            _bearer: Option<&str>,
        ) -> OrchestrationResult<Value> {
            Ok(json!({ "ack": envelope.message_id }))
        }
    }

    fn bus(config: BusConfig, cache: Option<Arc<dyn CacheBackend>>) -> MessageBus {
        MessageBus::new(
            "test-net",
            config,
            Arc::new(AckTransport),
            ReliabilityManager::new(ReliabilityConfig::default()),
            cache,
        )
    }

    #[tokio::test]
    async fn test_endpoint_validation() {
        let bus = bus(BusConfig::default(), None);
        for bad in ["", "localhost:8001", "ftp://host/a", "http://"] {
            assert!(
                matches!(
                    bus.register_agent("M1", bad, vec![], None).await,
                    Err(OrchestrationError::Validation(_))
                ),
                "{bad} should be rejected"
            );
        }
        assert!(bus
            .register_agent("M1", "https://agents.example.com/m1/", vec![], None)
            .await
            .is_ok());
        assert_eq!(bus.agent("M1").unwrap().endpoint, "https://agents.example.com/m1");
    }

    #[tokio::test]
    async fn test_reregistration_keeps_position() {
        let bus = bus(BusConfig::default(), None);
        bus.register_agent("M1", "http://a/1", vec![], None).await.unwrap();
        bus.register_agent("M2", "http://a/2", vec![], None).await.unwrap();
        bus.register_agent("M1", "http://b/1", vec!["x".into()], None)
            .await
            .unwrap();

        let agents = bus.agents();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].id, "M1");
        assert_eq!(agents[0].endpoint, "http://b/1");
        assert!(agents[0].capabilities.contains("x"));
    }

    #[tokio::test]
    async fn test_registration_mirrored_to_cache_without_token() {
        let cache = Arc::new(InMemoryCache::default());
        cache.connect().await.unwrap();
        let bus = bus(BusConfig::default(), Some(cache.clone()));

        bus.register_agent("M1", "http://a/1", vec![], Some("secret".into()))
            .await
            .unwrap();

        let mirrored = cache.get("agent:M1").await.unwrap().unwrap();
        assert_eq!(mirrored["endpoint"], "http://a/1");
        assert!(mirrored.get("auth_token").is_none());
    }

    #[tokio::test]
    async fn test_unknown_recipient() {
        let bus = bus(BusConfig::default(), None);
        let err = bus
            .send_secure("M1", "M9", json!({}), true)
            .await
            .unwrap_err();
        assert_eq!(err, OrchestrationError::not_found("agent", "M9"));
        assert_eq!(bus.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_status_counts_and_cleanup() {
        let bus = bus(BusConfig::default(), None);
        for id in ["M1", "M2", "M3"] {
            bus.register_agent(id, &format!("http://a/{id}"), vec![], None)
                .await
                .unwrap();
        }

        bus.send_secure("M1", "M2", json!({"n": 1}), true).await.unwrap();
        bus.send_secure("M2", "M1", json!({"n": 2}), true).await.unwrap();
        bus.send_secure("M1", "M3", json!({"n": 3}), true).await.unwrap();

        let status = bus.get_agent_status("M1").unwrap();
        assert_eq!(status.messages_sent, 2);
        assert_eq!(status.messages_received, 1);
        let last = status.last_message.unwrap();
        assert_eq!(last.payload, json!({"n": 3}));
        assert_eq!(last.status, MessageStatus::Delivered);

        assert_eq!(bus.cleanup(1), 2);
        assert_eq!(bus.queue_len(), 1);
        assert_eq!(bus.cleanup(5), 0);

        assert!(matches!(
            bus.get_agent_status("nobody"),
            Err(OrchestrationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_automatic_cleanup_cadence() {
        let config = BusConfig {
            max_queue_size: 2,
            cleanup_every: 3,
            ..BusConfig::default()
        };
        let bus = bus(config, None);
        bus.register_agent("M1", "http://a/1", vec![], None).await.unwrap();
        bus.register_agent("M2", "http://a/2", vec![], None).await.unwrap();

        for n in 0..2 {
            bus.send_secure("M1", "M2", json!({"n": n}), false).await.unwrap();
        }
        assert_eq!(bus.queue_len(), 2);
        bus.send_secure("M1", "M2", json!({"n": 2}), false).await.unwrap();
        assert_eq!(bus.queue_len(), 2);
        bus.send_secure("M1", "M2", json!({"n": 3}), false).await.unwrap();
        assert_eq!(bus.queue_len(), 3);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let bus = bus(BusConfig::default(), None);
        for id in ["M1", "M2", "M3"] {
            bus.register_agent(id, &format!("http://a/{id}"), vec![], None)
                .await
                .unwrap();
        }

        let summary = bus.broadcast("M1", json!({"alert": "budget"})).await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.broadcast_id.len(), 16);
        let targets: Vec<_> = summary.results.iter().map(|r| r.agent_id.as_str()).collect();
        assert_eq!(targets, vec!["M2", "M3"]);

        let network = bus.network_status();
        assert_eq!(network.registered_agents, 3);
        assert_eq!(network.message_queue_size, 2);
        assert_eq!(network.active_agents, 3);
        assert!(network.last_activity.is_some());
    }
}
