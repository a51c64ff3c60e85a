use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::WireEnvelope;
use crate::collaborators::Collaborator;
use crate::{OrchestrationError, OrchestrationResult};

/// Outbound delivery of A2A envelopes.
///
/// Unlike the other collaborators this one reports [`OrchestrationError`]
/// directly, so the bus can tell a remote rejection (`status` set) from a
/// network failure.
#[async_trait]
pub trait AgentTransport: Collaborator {
    async fn deliver(
        &self,
        endpoint: &str,
        envelope: &WireEnvelope,
        bearer: Option<&str>,
    ) -> OrchestrationResult<Value>;
}

/// POSTs envelopes as JSON to `<endpoint>/receive`
pub struct HttpAgentTransport {
    client: RwLock<Option<Client>>,
    request_timeout: Duration,
}

impl HttpAgentTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            client: RwLock::new(None),
            request_timeout,
        }
    }
}

impl Default for HttpAgentTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Collaborator for HttpAgentTransport {
    fn name(&self) -> &str {
        "transport"
    }

    async fn connect(&self) -> Result<()> {
        let client = Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
        *self.client.write() = Some(client);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.client.write().take();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if self.client.read().is_none() {
            return Err(anyhow!("HTTP transport is not connected"));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn deliver(
        &self,
        endpoint: &str,
        envelope: &WireEnvelope,
        bearer: Option<&str>,
    ) -> OrchestrationResult<Value> {
        let client = self
            .client
            .read()
            .clone()
            .ok_or_else(|| OrchestrationError::transport(endpoint, "HTTP transport is not connected"))?;

        let url = format!("{}/receive", endpoint.trim_end_matches('/'));
        let mut request = client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(envelope);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| OrchestrationError::transport(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint = %endpoint, status = status.as_u16(), "Agent rejected message");
            return Err(OrchestrationError::Transport {
                endpoint: endpoint.to_string(),
                reason: format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>()),
                status: Some(status.as_u16()),
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            OrchestrationError::transport(endpoint, format!("invalid JSON response: {e}"))
        })?;
        debug!(endpoint = %endpoint, message_id = %envelope.message_id, "Message delivered");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn envelope() -> WireEnvelope {
        WireEnvelope {
            from: "M1".into(),
            to: "M2".into(),
            message: json!({"task": "sentiment"}),
            timestamp: "2024-05-01T10:00:00.000000Z".into(),
            message_id: "0123456789abcdef".into(),
        }
    }

    #[tokio::test]
    async fn test_deliver_posts_envelope_with_bearer() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/agents/M2/receive")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::PartialJson(json!({"message_id": "0123456789abcdef"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ack": true}"#)
            .create_async()
            .await;

        let transport = HttpAgentTransport::default();
        transport.connect().await.unwrap();
        let endpoint = format!("{}/agents/M2", server.url());

        let body = transport
            .deliver(&endpoint, &envelope(), Some("secret"))
            .await
            .unwrap();
        assert_eq!(body, json!({"ack": true}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_reported() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/receive")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let transport = HttpAgentTransport::default();
        transport.connect().await.unwrap();

        let err = transport
            .deliver(&server.url(), &envelope(), None)
            .await
            .unwrap_err();
        assert!(err.is_remote_rejection());
        assert!(matches!(err, OrchestrationError::Transport { status: Some(503), .. }));
    }

    #[tokio::test]
    async fn test_non_json_body_is_transport_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/receive")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let transport = HttpAgentTransport::default();
        transport.connect().await.unwrap();

        let err = transport
            .deliver(&server.url(), &envelope(), None)
            .await
            .unwrap_err();
        assert!(!err.is_remote_rejection());
    }

    #[tokio::test]
    async fn test_deliver_before_connect_fails() {
        let transport = HttpAgentTransport::default();
        assert!(transport.ping().await.is_err());
        let err = transport
            .deliver("http://localhost:1", &envelope(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Transport { status: None, .. }));
    }
}
