//! Realtime connection hub
//!
//! One channel per user id. A send failure is treated as a disconnect: the
//! registration is dropped, but only if it still refers to the channel that
//! failed, so a concurrent reconnect is never undone. Every push and close
//! is bounded by the hub's send timeout; a push that times out is a failure.

pub mod channel;

pub use channel::{MpscChannel, RealtimeChannel};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::reliability::{bounded_call, TimeoutConfig};

#[derive(Clone)]
struct Connection {
    channel: Arc<dyn RealtimeChannel>,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubBroadcastSummary {
    pub total: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct ConnectionHub {
    connections: RwLock<HashMap<String, Connection>>,
    config: HubConfig,
    send_timeout: Duration,
}

fn same_channel(a: &Arc<dyn RealtimeChannel>, b: &Arc<dyn RealtimeChannel>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ConnectionHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            config,
            send_timeout: TimeoutConfig::default().push_timeout(),
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    async fn push(&self, channel: &Arc<dyn RealtimeChannel>, payload: &Value) -> anyhow::Result<()> {
        bounded_call(self.send_timeout, "channel send", channel.send(payload)).await
    }

    async fn close_channel(&self, channel: &Arc<dyn RealtimeChannel>) -> anyhow::Result<()> {
        bounded_call(self.send_timeout, "channel close", channel.close()).await
    }

    /// Register `channel` for `user_id`, replacing and closing any previous one
    pub async fn connect(&self, user_id: &str, channel: Arc<dyn RealtimeChannel>) {
        let displaced = self.connections.write().insert(
            user_id.to_string(),
            Connection {
                channel: Arc::clone(&channel),
                connected_at: Utc::now(),
            },
        );
        info!(user_id = %user_id, replaced = displaced.is_some(), "Client connected");

        if let Some(old) = displaced {
            if let Err(e) = self.close_channel(&old.channel).await {
                warn!(user_id = %user_id, error = %e, "Failed to close displaced channel");
            }
        }

        if self.config.send_welcome {
            let welcome = json!({
                "type": "connection_established",
                "user_id": user_id,
                "message": "Connected to agent orchestration hub",
                "timestamp": Utc::now().to_rfc3339(),
            });
            self.deliver(user_id, &channel, &welcome).await;
        }
    }

    /// Remove and close the user's channel. Returns whether one was registered.
    pub async fn disconnect(&self, user_id: &str) -> bool {
        let removed = self.connections.write().remove(user_id);
        match removed {
            Some(connection) => {
                if let Err(e) = self.close_channel(&connection.channel).await {
                    debug!(user_id = %user_id, error = %e, "Channel close failed on disconnect");
                }
                info!(user_id = %user_id, "Client disconnected");
                true
            }
            None => false,
        }
    }

    /// Push `payload` to one user. Absent users are a no-op; failures drop the registration.
    pub async fn send_personal(&self, user_id: &str, payload: &Value) -> bool {
        let channel = match self.connections.read().get(user_id) {
            Some(connection) => Arc::clone(&connection.channel),
            None => return false,
        };
        self.deliver(user_id, &channel, payload).await
    }

    /// Push `payload` to every connected user; failed channels are removed after the pass
    pub async fn broadcast(&self, payload: &Value) -> HubBroadcastSummary {
        let snapshot: Vec<(String, Arc<dyn RealtimeChannel>)> = self
            .connections
            .read()
            .iter()
            .map(|(user_id, connection)| (user_id.clone(), Arc::clone(&connection.channel)))
            .collect();

        let sends = snapshot
            .iter()
            .map(|(_, channel)| self.push(channel, payload));
        let outcomes = join_all(sends).await;

        let mut failed = 0;
        {
            let mut connections = self.connections.write();
            for ((user_id, channel), outcome) in snapshot.iter().zip(&outcomes) {
                if let Err(e) = outcome {
                    failed += 1;
                    warn!(user_id = %user_id, error = %e, "Broadcast send failed, dropping connection");
                    if connections
                        .get(user_id)
                        .is_some_and(|current| same_channel(&current.channel, channel))
                    {
                        connections.remove(user_id);
                    }
                }
            }
        }

        HubBroadcastSummary {
            total: snapshot.len(),
            delivered: snapshot.len() - failed,
            failed,
        }
    }

    /// Answer protocol frames sent by the client. Returns the reply if one was sent.
    pub async fn handle_client_frame(&self, user_id: &str, frame: &Value) -> Option<Value> {
        let timestamp = Utc::now().to_rfc3339();
        let reply = match frame.get("type").and_then(Value::as_str) {
            Some("ping") => json!({ "type": "pong", "timestamp": timestamp }),
            Some("status_request") => json!({
                "type": "status_response",
                "connected_users": self.connection_count(),
                "user_id": user_id,
                "timestamp": timestamp,
            }),
            other => {
                debug!(user_id = %user_id, frame_type = ?other, "Ignoring client frame");
                return None;
            }
        };

        self.send_personal(user_id, &reply).await.then_some(reply)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Connected user ids, sorted
    pub fn connected_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.connections.read().keys().cloned().collect();
        users.sort();
        users
    }

    pub fn connected_at(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.connections.read().get(user_id).map(|c| c.connected_at)
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections.read().contains_key(user_id)
    }

    async fn deliver(&self, user_id: &str, channel: &Arc<dyn RealtimeChannel>, payload: &Value) -> bool {
        match self.push(channel, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Send failed, dropping connection");
                let mut connections = self.connections.write();
                if connections
                    .get(user_id)
                    .is_some_and(|current| same_channel(&current.channel, channel))
                {
                    connections.remove(user_id);
                }
                false
            }
        }
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
