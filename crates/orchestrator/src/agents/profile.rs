use serde::{Deserialize, Serialize};

use super::Intent;

pub type AgentId = String;

/// Static roster entry for a specialist agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    pub name: String,
    pub role: String,
    pub specialty: Intent,
    /// Base URL used when the agent is registered on the message bus
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Resource URIs loaded into the context of every request this agent handles
    #[serde(default)]
    pub context_resources: Vec<String>,
}

impl AgentProfile {
    fn builtin(
        id: &str,
        name: &str,
        role: &str,
        specialty: Intent,
        capabilities: &[&str],
        context_resources: &[&str],
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            specialty,
            endpoint: format!("http://localhost:8001/agents/{id}"),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            context_resources: context_resources.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// The five built-in specialists, M1 through M5
pub fn default_roster() -> Vec<AgentProfile> {
    vec![
        AgentProfile::builtin(
            "M1",
            "Strategic Analyst",
            "Market analysis and strategic planning",
            Intent::StrategicAnalysis,
            &["market_analysis", "competitor_research", "strategic_planning"],
            &["schema://agents/roster", "data://store/projects"],
        ),
        AgentProfile::builtin(
            "M2",
            "Social Listener",
            "Social media monitoring and sentiment",
            Intent::SocialMedia,
            &["social_monitoring", "sentiment_analysis", "engagement_tracking"],
            &["social://mentions/recent", "analytics://social/metrics"],
        ),
        AgentProfile::builtin(
            "M3",
            "Campaign Optimizer",
            "Campaign performance and budget",
            Intent::CampaignOptimization,
            &["campaign_optimization", "roi_analysis", "budget_management"],
            &["analytics://campaigns/summary", "data://store/roi_metrics"],
        ),
        AgentProfile::builtin(
            "M4",
            "Content Strategist",
            "Content strategy and editorial planning",
            Intent::ContentStrategy,
            &["content_strategy", "creative_planning", "editorial_calendar"],
            &["content://templates/list", "planning://calendar/current"],
        ),
        AgentProfile::builtin(
            "M5",
            "Data Analyst",
            "Data analysis and predictive insights",
            Intent::DataAnalysis,
            &["data_analysis", "predictive_modeling", "insights_generation"],
            &["analytics://data/overview", "insights://predictive/latest"],
        ),
    ]
}
