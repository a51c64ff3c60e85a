//! URI-addressed resource cache
//!
//! Bounded LRU keyed by canonical resource URI. Misses and expired entries
//! are loaded through a [`ResourceFetcher`]; fetch failures and fetches
//! that outlive the call timeout degrade to "absent" and are only logged.

pub mod fetcher;
pub mod tools;
pub mod uri;

pub use fetcher::{ResourceFetcher, StoreResourceFetcher};
pub use tools::Tool;
pub use uri::{ResourceKind, ResourceUri};

use anyhow::{anyhow, bail};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::collaborators::{CacheBackend, DurableStore, RecordFilter};
use crate::config::ResourceConfig;
use crate::reliability::{bounded_call, TimeoutConfig};
use crate::{OrchestrationError, OrchestrationResult};

const DEFAULT_QUERY_LIMIT: usize = 10;
const MAX_QUERY_LIMIT: usize = 100;

/// A cached resource
#[derive(Debug, Clone)]
pub struct Resource {
    pub uri: ResourceUri,
    pub kind: ResourceKind,
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
    pub access_count: u64,
    loaded_at: Instant,
}

impl Resource {
    fn new(uri: ResourceUri, kind: ResourceKind, payload: Value) -> Self {
        Self {
            uri,
            kind,
            payload,
            fetched_at: Utc::now(),
            access_count: 0,
            loaded_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.loaded_at.elapsed() >= ttl)
    }
}

/// Metadata returned by `list`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSummary {
    pub uri: String,
    pub kind: ResourceKind,
    pub fetched_at: DateTime<Utc>,
    pub access_count: u64,
}

impl From<&Resource> for ResourceSummary {
    fn from(resource: &Resource) -> Self {
        Self {
            uri: resource.uri.to_string(),
            kind: resource.kind,
            fetched_at: resource.fetched_at,
            access_count: resource.access_count,
        }
    }
}

pub struct ResourceStore {
    entries: Mutex<LruCache<String, Resource>>,
    ttl: Option<Duration>,
    fetcher: Arc<dyn ResourceFetcher>,
    store: Option<Arc<dyn DurableStore>>,
    cache: Option<Arc<dyn CacheBackend>>,
    call_timeout: Duration,
}

impl ResourceStore {
    pub fn new(
        config: &ResourceConfig,
        fetcher: Arc<dyn ResourceFetcher>,
        store: Option<Arc<dyn DurableStore>>,
        cache: Option<Arc<dyn CacheBackend>>,
    ) -> OrchestrationResult<Self> {
        let capacity = NonZeroUsize::new(config.capacity).ok_or_else(|| {
            OrchestrationError::Validation("resource cache capacity must be positive".into())
        })?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: config.ttl(),
            fetcher,
            store,
            cache,
            call_timeout: TimeoutConfig::default().collaborator_timeout(),
        })
    }

    /// Bound fetcher, store and cache calls by `call_timeout`
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Payload for `uri`, fetching on miss. Never fails: problems are logged and yield `None`.
    pub async fn get(&self, uri: &str) -> Option<Value> {
        let parsed = match uri.parse::<ResourceUri>() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(uri = %uri, error = %e, "Rejected malformed resource URI");
                return None;
            }
        };
        let key = parsed.to_string();

        if let Some(payload) = self.cached(&key) {
            return Some(payload);
        }

        let fetch = self.fetcher.fetch(&parsed);
        let payload = match bounded_call(self.call_timeout, "resource fetch", fetch).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(uri = %key, error = %e, "Resource fetch failed");
                return None;
            }
        };
        debug!(uri = %key, "Resource fetched");

        let mut entries = self.entries.lock();
        // A concurrent caller may have stored the resource while we fetched
        let access_count = entries
            .peek(&key)
            .filter(|existing| !existing.is_expired(self.ttl))
            .map_or(0, |existing| existing.access_count);

        let kind = parsed.kind;
        let mut resource = Resource::new(parsed, kind, payload.clone());
        resource.access_count = access_count + 1;
        entries.put(key, resource);

        Some(payload)
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        let expired = match entries.get_mut(key) {
            None => return None,
            Some(resource) if resource.is_expired(self.ttl) => true,
            Some(resource) => {
                resource.access_count += 1;
                return Some(resource.payload.clone());
            }
        };

        if expired {
            debug!(uri = %key, "Resource expired");
            entries.pop(key);
        }
        None
    }

    /// Insert or replace a resource, resetting its access count
    pub fn register(&self, uri: &str, kind: ResourceKind, payload: Value) -> OrchestrationResult<()> {
        let parsed = uri.parse::<ResourceUri>()?;
        if parsed.kind != kind {
            return Err(OrchestrationError::Validation(format!(
                "resource kind {kind} does not match URI scheme of {uri}"
            )));
        }

        let key = parsed.to_string();
        debug!(uri = %key, kind = %kind, "Resource registered");
        self.entries
            .lock()
            .put(key, Resource::new(parsed, kind, payload));
        Ok(())
    }

    /// Run a named tool. Unknown names and tool failures are logged and yield `None`.
    pub async fn call_tool(&self, name: &str, args: &Value) -> Option<Value> {
        let tool = match name.parse::<Tool>() {
            Ok(tool) => tool,
            Err(e) => {
                warn!(tool = %name, error = %e, "Unknown tool requested");
                return None;
            }
        };

        let result = match tool {
            Tool::StoreQuery => self.store_query(args).await,
            Tool::CacheOperation => self.cache_operation(args).await,
            Tool::ListResources => Ok(json!({ "resources": self.list() })),
        };

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(tool = %tool, error = %e, "Tool call failed");
                None
            }
        }
    }

    async fn store_query(&self, args: &Value) -> anyhow::Result<Value> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| anyhow!("durable store not configured"))?;
        let table = args
            .get("table")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("store_query requires a 'table' string"))?;

        let filter: RecordFilter = match args.get("filter") {
            None | Some(Value::Null) => RecordFilter::new(),
            Some(Value::Object(fields)) => fields.clone().into_iter().collect(),
            Some(other) => bail!("store_query 'filter' must be an object, got {other}"),
        };
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_QUERY_LIMIT, |n| (n as usize).min(MAX_QUERY_LIMIT));

        let records = bounded_call(
            self.call_timeout,
            "store read",
            store.read(table, &filter, limit),
        )
        .await?;
        Ok(json!({ "count": records.len(), "records": records }))
    }

    async fn cache_operation(&self, args: &Value) -> anyhow::Result<Value> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| anyhow!("cache not configured"))?;
        let key = args
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("cache_operation requires a 'key' string"))?;

        match args.get("operation").and_then(Value::as_str) {
            Some("get") => {
                let value = bounded_call(self.call_timeout, "cache get", cache.get(key)).await?;
                Ok(json!({ "key": key, "value": value }))
            }
            Some("set") => {
                let value = args
                    .get("value")
                    .cloned()
                    .ok_or_else(|| anyhow!("cache_operation 'set' requires a 'value'"))?;
                let ttl = args
                    .get("ttl_secs")
                    .and_then(Value::as_u64)
                    .map(Duration::from_secs);
                bounded_call(self.call_timeout, "cache set", cache.set(key, value, ttl)).await?;
                Ok(json!({ "key": key, "stored": true }))
            }
            other => bail!("unsupported cache operation: {other:?}"),
        }
    }

    /// Snapshot of cached resources, most recently used first
    pub fn list(&self) -> Vec<ResourceSummary> {
        self.entries
            .lock()
            .iter()
            .map(|(_, resource)| ResourceSummary::from(resource))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}
