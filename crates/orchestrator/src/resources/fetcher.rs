use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{ResourceKind, ResourceUri};
use crate::agents::AgentProfile;
use crate::collaborators::{DurableStore, RecordFilter};

const STORE_READ_LIMIT: usize = 10;

/// Loads the payload behind a resource URI on cache miss
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, uri: &ResourceUri) -> Result<Value>;
}

/// Serves `data://store/<table>[/<user_id>]` from the durable store and
/// `schema://agents/roster` from the agent roster.
pub struct StoreResourceFetcher {
    store: Option<Arc<dyn DurableStore>>,
    roster: Vec<AgentProfile>,
}

impl StoreResourceFetcher {
    pub fn new(store: Option<Arc<dyn DurableStore>>, roster: Vec<AgentProfile>) -> Self {
        Self { store, roster }
    }

    async fn read_table(&self, uri: &ResourceUri) -> Result<Value> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| anyhow!("durable store not configured"))?;

        let mut filter = RecordFilter::new();
        if let Some(user_id) = uri.param(0) {
            filter.insert("user_id".to_string(), json!(user_id));
        }

        let records = store
            .read(&uri.operation, &filter, STORE_READ_LIMIT)
            .await?;
        Ok(json!({
            "table": uri.operation,
            "count": records.len(),
            "records": records,
        }))
    }
}

#[async_trait]
impl ResourceFetcher for StoreResourceFetcher {
    async fn fetch(&self, uri: &ResourceUri) -> Result<Value> {
        match (uri.kind, uri.resource.as_str(), uri.operation.as_str()) {
            (ResourceKind::Data, "store", _) => self.read_table(uri).await,
            (ResourceKind::Schema, "agents", "roster") => Ok(json!({
                "agents": self.roster,
                "count": self.roster.len(),
            })),
            _ => bail!("no source for resource {uri}"),
        }
    }
}
