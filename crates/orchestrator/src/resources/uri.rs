use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::OrchestrationError;

/// Resource URI schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Data,
    Analytics,
    Schema,
    Content,
    Planning,
    Insights,
    Social,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Data => "data",
            ResourceKind::Analytics => "analytics",
            ResourceKind::Schema => "schema",
            ResourceKind::Content => "content",
            ResourceKind::Planning => "planning",
            ResourceKind::Insights => "insights",
            ResourceKind::Social => "social",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(ResourceKind::Data),
            "analytics" => Ok(ResourceKind::Analytics),
            "schema" => Ok(ResourceKind::Schema),
            "content" => Ok(ResourceKind::Content),
            "planning" => Ok(ResourceKind::Planning),
            "insights" => Ok(ResourceKind::Insights),
            "social" => Ok(ResourceKind::Social),
            other => Err(OrchestrationError::Validation(format!(
                "unknown resource scheme: {other}"
            ))),
        }
    }
}

/// Parsed `<scheme>://<resource>/<operation>[/<param>...]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceUri {
    pub kind: ResourceKind,
    pub resource: String,
    pub operation: String,
    pub params: Vec<String>,
}

impl ResourceUri {
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

impl FromStr for ResourceUri {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| OrchestrationError::Validation(format!("{reason}: {s:?}"));

        let (scheme, path) = s
            .split_once("://")
            .ok_or_else(|| invalid("resource URI is missing '://'"))?;
        let kind = scheme.parse::<ResourceKind>()?;

        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() < 2 || segments.iter().any(|segment| segment.is_empty()) {
            return Err(invalid("resource URI needs non-empty <resource>/<operation>"));
        }

        Ok(Self {
            kind,
            resource: segments[0].to_string(),
            operation: segments[1].to_string(),
            params: segments[2..].iter().map(|p| p.to_string()).collect(),
        })
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.kind, self.resource, self.operation)?;
        for param in &self.params {
            write!(f, "/{param}")?;
        }
        Ok(())
    }
}
