//! Agent-to-agent messaging: registry, queue, secure send and broadcast

pub mod bus;
pub mod message;
pub mod transport;

pub use bus::{
    AgentAvailability, AgentDescriptor, AgentStatusReport, BroadcastSummary, DeliveryOutcome,
    MessageBus, NetworkStatus,
};
pub use message::{message_id, wire_timestamp, MessageRecord, MessageStatus, WireEnvelope};
pub use transport::{AgentTransport, HttpAgentTransport};
