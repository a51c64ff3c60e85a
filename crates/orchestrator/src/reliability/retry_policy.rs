//! Retry Policy Implementation
//!
//! Capped exponential backoff with optional jitter. On exhaustion the last
//! error is returned unmodified so callers keep the original error type.

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff strategies for retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed { delay: Duration },

    /// Exponential backoff: initial_delay * base^attempt, capped at max_delay
    Exponential {
        initial_delay: Duration,
        base: f64,
        max_delay: Duration,
        jitter: bool,
    },
}

impl BackoffStrategy {
    /// Calculate delay after failed attempt `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,

            Self::Exponential {
                initial_delay,
                base,
                max_delay,
                jitter,
            } => {
                let scaled = initial_delay.as_millis() as f64 * base.powi(attempt as i32);
                let capped = scaled.min(max_delay.as_millis() as f64);
                let delay = Duration::from_millis(capped as u64);

                if *jitter {
                    Self::add_jitter(delay).min(*max_delay)
                } else {
                    delay
                }
            }
        }
    }

    /// Add jitter to delay (±25% random variation)
    fn add_jitter(delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_factor = rng.gen_range(0.75..=1.25);
        let jittered_millis = (delay.as_millis() as f64 * jitter_factor) as u64;
        Duration::from_millis(jittered_millis)
    }
}

/// Configuration for retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> BackoffStrategy {
        let initial_delay = Duration::from_millis(self.base_delay_ms);
        if self.backoff_factor == 1.0 && !self.jitter {
            return BackoffStrategy::Fixed {
                delay: initial_delay.min(Duration::from_millis(self.max_delay_ms)),
            };
        }

        BackoffStrategy::Exponential {
            initial_delay,
            base: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

/// Statistics for retry operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_retry_attempts: u64,
}

impl RetryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            self.successful_operations as f64 / self.total_operations as f64
        }
    }
}

/// Retry policy implementation
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    backoff: BackoffStrategy,
    stats: Mutex<RetryStats>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            backoff: config.backoff(),
            config,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.calculate_delay(attempt)
    }

    /// Execute operation, retrying every error until `max_retries` is spent
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.stats.lock().total_operations += 1;
        let mut attempt = 0u32;

        loop {
            debug!(attempt = attempt + 1, "Executing operation with retry policy");

            match operation().await {
                Ok(value) => {
                    let mut stats = self.stats.lock();
                    stats.successful_operations += 1;
                    stats.total_retry_attempts += attempt as u64;
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt >= self.config.max_retries {
                        warn!(
                            error = %error,
                            attempts = attempt + 1,
                            "Operation failed, giving up"
                        );
                        let mut stats = self.stats.lock();
                        stats.failed_operations += 1;
                        stats.total_retry_attempts += attempt as u64;
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt);
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying after delay"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn get_stats(&self) -> RetryStats {
        self.stats.lock().clone()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
