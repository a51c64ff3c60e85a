use std::collections::HashSet;

use super::{AgentId, AgentProfile, Intent};
use crate::{OrchestrationError, OrchestrationResult};

const MIN_ROSTER_SIZE: usize = 3;
const COLLABORATOR_COUNT: usize = 2;

/// Maps intents to agents over a validated, immutable roster
#[derive(Debug, Clone)]
pub struct AgentRouter {
    roster: Vec<AgentProfile>,
    /// Index of the first strategic agent, the fallback for intents without a specialist
    fallback: usize,
}

impl AgentRouter {
    pub fn new(roster: Vec<AgentProfile>) -> OrchestrationResult<Self> {
        if roster.len() < MIN_ROSTER_SIZE {
            return Err(OrchestrationError::Validation(format!(
                "roster needs at least {MIN_ROSTER_SIZE} agents, got {}",
                roster.len()
            )));
        }

        let mut seen = HashSet::new();
        for profile in &roster {
            if !seen.insert(profile.id.as_str()) {
                return Err(OrchestrationError::Validation(format!(
                    "duplicate agent id in roster: {}",
                    profile.id
                )));
            }
        }

        let fallback = roster
            .iter()
            .position(|p| p.specialty == Intent::StrategicAnalysis)
            .ok_or_else(|| {
                OrchestrationError::Validation("roster has no strategic agent".to_string())
            })?;

        Ok(Self { roster, fallback })
    }

    pub fn roster(&self) -> &[AgentProfile] {
        &self.roster
    }

    pub fn profile(&self, id: &str) -> Option<&AgentProfile> {
        self.roster.iter().find(|p| p.id == id)
    }

    /// First roster agent specializing in `intent`, else the first strategic agent
    pub fn select_primary(&self, intent: Intent) -> &AgentId {
        let profile = self
            .roster
            .iter()
            .find(|p| p.specialty == intent)
            .unwrap_or(&self.roster[self.fallback]);
        &profile.id
    }

    /// The first two other agents in roster order
    pub fn get_collaborators(&self, primary: &str) -> Vec<AgentId> {
        self.roster
            .iter()
            .filter(|p| p.id != primary)
            .take(COLLABORATOR_COUNT)
            .map(|p| p.id.clone())
            .collect()
    }
}
