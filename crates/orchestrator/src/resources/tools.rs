use std::fmt;
use std::str::FromStr;

use crate::OrchestrationError;

/// Tools callable through `ResourceStore::call_tool`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// `{table, filter?, limit?}` read from the durable store
    StoreQuery,
    /// `{operation: "get" | "set", key, value?, ttl_secs?}` against the cache
    CacheOperation,
    /// Metadata for every cached resource
    ListResources,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::StoreQuery, Tool::CacheOperation, Tool::ListResources];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::StoreQuery => "store_query",
            Tool::CacheOperation => "cache_operation",
            Tool::ListResources => "list_resources",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tool::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| OrchestrationError::UnknownTool(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names_round_trip() {
        for tool in Tool::ALL {
            assert_eq!(tool.as_str().parse::<Tool>(), Ok(tool));
        }
        assert_eq!(
            "git_operation".parse::<Tool>(),
            Err(OrchestrationError::UnknownTool("git_operation".into()))
        );
    }
}
