use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Delivery status of a queued message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Delivered,
    /// Remote answered with a non-2xx status
    Failed,
    /// Network, timeout or open circuit
    Error,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
            MessageStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// First 16 hex chars of SHA-256(from ∥ to ∥ timestamp)
pub fn message_id(from: &str, to: &str, timestamp: &str) -> String {
    short_digest(&[from, to, timestamp])
}

/// First 16 hex chars of the SHA-256 of the concatenated parts
pub(crate) fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Timestamp format shared by message ids and wire envelopes
pub fn wire_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A message in the bus queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub from: String,
    pub to: String,
    pub payload: Value,
    pub timestamp: String,
    pub status: MessageStatus,
}

impl MessageRecord {
    pub fn new(from: &str, to: &str, payload: Value, at: DateTime<Utc>) -> Self {
        let timestamp = wire_timestamp(at);
        Self {
            id: message_id(from, to, &timestamp),
            from: from.to_string(),
            to: to.to_string(),
            payload,
            timestamp,
            status: MessageStatus::Pending,
        }
    }

    pub fn envelope(&self) -> WireEnvelope {
        WireEnvelope {
            from: self.from.clone(),
            to: self.to.clone(),
            message: self.payload.clone(),
            timestamp: self.timestamp.clone(),
            message_id: self.id.clone(),
        }
    }
}

/// JSON body POSTed to `<endpoint>/receive`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub from: String,
    pub to: String,
    pub message: Value,
    pub timestamp: String,
    pub message_id: String,
}
