//! Reliability Module
//!
//! Resilience wrappers for outbound agent calls. Every remote attempt runs
//! under a timeout inside the endpoint's circuit breaker, and the retry
//! policy governs the attempt sequence:
//! `Retry(CircuitBreaker(Timeout(call)))`.

pub mod circuit_breaker;
pub mod health;
pub mod retry_policy;
pub mod timeout_manager;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerState,
    CircuitBreakerStats,
};
pub use health::{HealthReport, HealthStatus, SubsystemHealth};
pub use retry_policy::{BackoffStrategy, RetryConfig, RetryPolicy, RetryStats};
pub use timeout_manager::{bounded_call, with_timeout, TimeoutConfig};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use crate::{OrchestrationError, OrchestrationResult};

/// Configuration for reliability features
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub timeout: TimeoutConfig,
}

/// Per-endpoint circuit breakers plus a shared retry policy
#[derive(Debug)]
pub struct ReliabilityManager {
    config: ReliabilityConfig,
    retry: RetryPolicy,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl ReliabilityManager {
    pub fn new(config: ReliabilityConfig) -> Self {
        Self {
            retry: RetryPolicy::new(config.retry.clone()),
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    /// Breaker for `endpoint`, created closed on first use
    pub fn breaker_for(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                tracing::debug!(endpoint = %endpoint, "Circuit breaker created");
                Arc::new(CircuitBreaker::new(
                    endpoint,
                    self.config.circuit_breaker.clone(),
                ))
            })
            .value()
            .clone()
    }

    /// Run `operation` against `endpoint` with timeout, circuit breaker and retry.
    ///
    /// A rejection by the open circuit is retried like any other failure, so a
    /// later attempt can land after the recovery timeout and probe half-open.
    pub async fn execute<F, Fut, T>(&self, endpoint: &str, mut operation: F) -> OrchestrationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OrchestrationResult<T>>,
    {
        let breaker = self.breaker_for(endpoint);
        let limit = self.config.timeout.message_timeout();

        self.retry
            .execute(|| {
                let breaker = Arc::clone(&breaker);
                let attempt = operation();
                async move {
                    breaker
                        .call(|| with_timeout(limit, breaker.name(), attempt))
                        .await
                }
            })
            .await
    }

    pub fn breaker_states(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.get_stats()
    }
}

impl Default for ReliabilityManager {
    fn default() -> Self {
        Self::new(ReliabilityConfig::default())
    }
}
