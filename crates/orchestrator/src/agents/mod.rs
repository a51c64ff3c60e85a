//! Agents: intent classification, the roster and routing

pub mod intent_classifier;
pub mod profile;
pub mod router;

pub use intent_classifier::{Intent, IntentClassifier};
pub use profile::{default_roster, AgentId, AgentProfile};
pub use router::AgentRouter;
