//! Orchestrator configuration
//!
//! Every section has serde defaults so partial TOML files work. Durations are
//! plain integer fields with a `_ms` or `_secs` suffix.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agents::{default_roster, AgentProfile};
use crate::reliability::ReliabilityConfig;
use crate::{OrchestrationError, OrchestrationResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Identifier reported by network status and health checks
    pub network_id: String,
    pub agents: Vec<AgentProfile>,
    pub bus: BusConfig,
    pub reliability: ReliabilityConfig,
    pub resources: ResourceConfig,
    pub hub: HubConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            network_id: "concierge-a2a".to_string(),
            agents: default_roster(),
            bus: BusConfig::default(),
            reliability: ReliabilityConfig::default(),
            resources: ResourceConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> OrchestrationResult<()> {
        let retry = &self.reliability.retry;
        let checks: [(bool, &str); 9] = [
            (self.bus.max_queue_size == 0, "bus.max_queue_size must be positive"),
            (self.bus.cleanup_every == 0, "bus.cleanup_every must be positive"),
            (self.bus.status_window == 0, "bus.status_window must be positive"),
            (self.resources.capacity == 0, "resources.capacity must be positive"),
            (
                self.reliability.circuit_breaker.failure_threshold == 0,
                "reliability.circuit_breaker.failure_threshold must be positive",
            ),
            (
                self.reliability.circuit_breaker.half_open_max_calls == 0,
                "reliability.circuit_breaker.half_open_max_calls must be positive",
            ),
            (
                !retry.backoff_factor.is_finite() || retry.backoff_factor < 1.0,
                "reliability.retry.backoff_factor must be at least 1.0",
            ),
            (
                self.reliability.timeout.message_timeout_ms == 0,
                "reliability.timeout.message_timeout_ms must be positive",
            ),
            (
                self.reliability.timeout.push_timeout_ms == 0
                    || self.reliability.timeout.collaborator_timeout_ms == 0,
                "reliability.timeout push and collaborator timeouts must be positive",
            ),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(OrchestrationError::Validation(reason.to_string())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Queue length kept by the periodic cleanup
    pub max_queue_size: usize,
    /// Run cleanup after this many sends
    pub cleanup_every: u64,
    /// Most recent queue entries scanned by agent status
    pub status_window: usize,
    /// Attach the registered bearer token on sends
    pub require_auth: bool,
    /// TTL for the registration mirror written to the cache collaborator
    pub registry_cache_ttl_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            cleanup_every: 100,
            status_window: 100,
            require_auth: true,
            registry_cache_ttl_secs: 3600,
        }
    }
}

impl BusConfig {
    pub fn registry_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub capacity: usize,
    /// Entries older than this are refetched; `None` keeps them until evicted
    pub ttl_secs: Option<u64>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl_secs: Some(3600),
        }
    }
}

impl ResourceConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Send a `connection_established` frame to every new connection
    pub send_welcome: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { send_welcome: true }
    }
}
