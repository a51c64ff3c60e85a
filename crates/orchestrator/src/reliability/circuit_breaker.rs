//! Circuit Breaker Implementation
//!
//! One breaker guards one remote endpoint. Consecutive failures open the
//! circuit; after the recovery timeout a limited number of trial calls run in
//! half-open state and decide whether the circuit closes again.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CircuitBreakerError {
    #[error("Circuit breaker for {name} is open - operation blocked")]
    Open { name: String },
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    /// Requests flow through normally
    #[default]
    Closed,

    /// Requests are blocked
    Open,

    /// Trial requests test whether the endpoint recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// Time since the last failure before a trial call is allowed
    pub recovery_timeout_ms: u64,

    /// Concurrent trial calls allowed in half-open state
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

/// Statistics for circuit breaker operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitBreakerStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub blocked_requests: u64,
    pub state_transitions: u64,
    pub current_state: CircuitBreakerState,
    pub failure_count: u32,
}

impl CircuitBreakerStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    pub fn block_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.blocked_requests as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    half_open_in_flight: u32,
}

/// Circuit breaker implementation
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    blocked_requests: AtomicU64,
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` if the circuit admits it and record the outcome
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitBreakerError>,
    {
        self.try_acquire()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Admit or block one call. Moves OPEN to HALF_OPEN once the recovery timeout elapsed.
    pub fn try_acquire(&self) -> Result<(), CircuitBreakerError> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        if inner.state == CircuitBreakerState::Open {
            let recovered = inner
                .last_failure_time
                .map(|t| t.elapsed() >= self.config.recovery_timeout())
                .unwrap_or(true);
            if recovered {
                self.transition(&mut inner, CircuitBreakerState::HalfOpen);
            }
        }

        let state = inner.state;
        match state {
            CircuitBreakerState::Closed => Ok(()),
            CircuitBreakerState::HalfOpen
                if inner.half_open_in_flight < self.config.half_open_max_calls =>
            {
                inner.half_open_in_flight += 1;
                Ok(())
            }
            _ => {
                self.blocked_requests.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint = %self.name, state = %state, "Call blocked by circuit breaker");
                Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                })
            }
        }
    }

    pub fn record_success(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        let state = inner.state;
        match state {
            CircuitBreakerState::Closed => inner.failure_count = 0,
            CircuitBreakerState::HalfOpen => {
                inner.failure_count = 0;
                self.transition(&mut inner, CircuitBreakerState::Closed);
            }
            // A call admitted before the circuit opened finished late
            CircuitBreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.last_failure_time = Some(Instant::now());

        let state = inner.state;
        match state {
            CircuitBreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitBreakerState::Open);
                }
            }
            CircuitBreakerState::HalfOpen => {
                inner.failure_count += 1;
                self.transition(&mut inner, CircuitBreakerState::Open);
            }
            CircuitBreakerState::Open => inner.failure_count += 1,
        }
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
            current_state: inner.state,
            failure_count: inner.failure_count,
        }
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitBreakerState) {
        if inner.state == next {
            return;
        }

        match next {
            CircuitBreakerState::Open => warn!(
                endpoint = %self.name,
                failure_count = inner.failure_count,
                "Circuit breaker opening - blocking requests"
            ),
            CircuitBreakerState::HalfOpen => info!(
                endpoint = %self.name,
                "Circuit breaker transitioning to half-open - testing recovery"
            ),
            CircuitBreakerState::Closed => {
                info!(endpoint = %self.name, "Circuit breaker closing - endpoint recovered")
            }
        }

        inner.state = next;
        inner.half_open_in_flight = 0;
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
    }
}
