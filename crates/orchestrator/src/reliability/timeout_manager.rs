//! Per-call timeouts for outbound traffic: agent deliveries, client pushes
//! and collaborator calls

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::{OrchestrationError, OrchestrationResult};

/// Configuration for timeout management
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Timeout for a single message delivery attempt
    pub message_timeout_ms: u64,

    /// Timeout for collaborator connect/ping/close during startup, health checks and shutdown
    pub health_check_timeout_ms: u64,

    /// Timeout for one push to a client channel; expiry counts as a disconnect
    pub push_timeout_ms: u64,

    /// Timeout for store, cache, fetcher and executor calls
    pub collaborator_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            message_timeout_ms: 30_000,
            health_check_timeout_ms: 5_000,
            push_timeout_ms: 5_000,
            collaborator_timeout_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }
}

/// Await `operation` for at most `limit`; expiry becomes a transport error for `endpoint`
pub async fn with_timeout<T, Fut>(
    limit: Duration,
    endpoint: &str,
    operation: Fut,
) -> OrchestrationResult<T>
where
    Fut: Future<Output = OrchestrationResult<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => {
            warn!(endpoint = %endpoint, timeout_ms = limit.as_millis() as u64, "Operation timed out");
            Err(OrchestrationError::transport(
                endpoint,
                format!("timed out after {}ms", limit.as_millis()),
            ))
        }
    }
}

/// Await a collaborator call for at most `limit`; expiry becomes an error naming `what`
pub async fn bounded_call<T, Fut>(limit: Duration, what: &str, operation: Fut) -> anyhow::Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => {
            warn!(call = %what, timeout_ms = limit.as_millis() as u64, "Call timed out");
            Err(anyhow::anyhow!(
                "{what} timed out after {}ms",
                limit.as_millis()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_transport_error() {
        let result: OrchestrationResult<()> = with_timeout(
            Duration::from_millis(50),
            "http://slow",
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        match result {
            Err(OrchestrationError::Transport {
                endpoint, status, ..
            }) => {
                assert_eq!(endpoint, "http://slow");
                assert_eq!(status, None);
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_call_expiry_names_the_call() {
        let result: anyhow::Result<()> = bounded_call(
            Duration::from_secs(1),
            "store write",
            std::future::pending(),
        )
        .await;

        let message = result.unwrap_err().to_string();
        assert_eq!(message, "store write timed out after 1000ms");
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let ok = with_timeout(Duration::from_secs(1), "http://fast", async { Ok(3) }).await;
        assert_eq!(ok, Ok(3));

        let err: OrchestrationResult<()> = with_timeout(Duration::from_secs(1), "http://fast", async {
            Err(OrchestrationError::Validation("bad".into()))
        })
        .await;
        assert_eq!(err, Err(OrchestrationError::Validation("bad".into())));
    }
}
