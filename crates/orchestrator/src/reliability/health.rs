//! Health reporting types shared by the coordinator and its subsystems

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::coordinator::CoordinatorState;

/// Health status for one subsystem or collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    /// Subsystem is up and responding normally
    Healthy,
    /// Subsystem works with reduced capability
    Degraded { reason: String },
    /// Subsystem failed to connect or stopped responding
    Unavailable { reason: String },
    /// Optional collaborator was not supplied
    NotConfigured,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Status plus a free-form details object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemHealth {
    #[serde(flatten)]
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl SubsystemHealth {
    pub fn healthy(details: serde_json::Value) -> Self {
        Self {
            status: HealthStatus::Healthy,
            details,
        }
    }

    pub fn with_status(status: HealthStatus) -> Self {
        Self {
            status,
            details: serde_json::Value::Null,
        }
    }
}

/// Coordinator-wide health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: CoordinatorState,
    pub timestamp: DateTime<Utc>,
    pub network_id: String,
    pub subsystems: BTreeMap<String, SubsystemHealth>,
}

impl HealthReport {
    /// Names of subsystems that are not healthy, including unconfigured ones
    pub fn unhealthy_subsystems(&self) -> Vec<&str> {
        self.subsystems
            .iter()
            .filter(|(_, health)| !health.status.is_healthy())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
