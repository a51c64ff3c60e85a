//! External collaborator interfaces
//!
//! Pluggable backends the core talks to: durable storage, cache, the LLM task
//! executor and (in `a2a`) the agent transport. Backends report failures as
//! `anyhow::Result`; the core maps them into [`crate::OrchestrationError`] or
//! degrades at its seams. In-memory implementations back the binary and tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle shared by every collaborator
#[async_trait]
pub trait Collaborator: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Field equality filter for store reads
pub type RecordFilter = BTreeMap<String, Value>;

#[async_trait]
pub trait DurableStore: Collaborator {
    /// Up to `limit` records from `table` matching every filter field, newest first
    async fn read(&self, table: &str, filter: &RecordFilter, limit: usize) -> Result<Vec<Value>>;

    /// Persist `record`, returning it as stored
    async fn write(&self, table: &str, record: Value) -> Result<Value>;
}

#[async_trait]
pub trait CacheBackend: Collaborator {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;
}

/// LLM-backed text generation
#[async_trait]
pub trait TaskExecutor: Collaborator {
    async fn execute(&self, task: &str, context: &Value) -> Result<String>;
}

#[derive(Debug)]
struct ConnectionFlag(AtomicBool);

impl ConnectionFlag {
    fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::SeqCst);
    }

    fn ensure(&self, name: &str) -> Result<()> {
        if !self.0.load(Ordering::SeqCst) {
            bail!("{name} is not connected");
        }
        Ok(())
    }
}

/// Table store held in process memory
#[derive(Debug)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    connected: ConnectionFlag,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            connected: ConnectionFlag::new(),
        }
    }
}

impl InMemoryStore {
    /// Store preloaded with `records` for `table`, in insertion order
    pub fn with_table(self, table: &str, records: Vec<Value>) -> Self {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .extend(records);
        self
    }

    pub fn table_len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, Vec::len)
    }
}

#[async_trait]
impl Collaborator for InMemoryStore {
    fn name(&self) -> &str {
        "store"
    }

    async fn connect(&self) -> Result<()> {
        self.connected.set(true);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.set(false);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.connected.ensure(self.name())
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn read(&self, table: &str, filter: &RecordFilter, limit: usize) -> Result<Vec<Value>> {
        self.connected.ensure(self.name())?;

        let tables = self.tables.read();
        let Some(records) = tables.get(table) else {
            return Ok(Vec::new());
        };

        Ok(records
            .iter()
            .rev()
            .filter(|record| {
                filter
                    .iter()
                    .all(|(field, expected)| record.get(field) == Some(expected))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn write(&self, table: &str, mut record: Value) -> Result<Value> {
        self.connected.ensure(self.name())?;

        if !record.is_object() {
            bail!("records must be JSON objects, got {record}");
        }
        if let Some(fields) = record.as_object_mut() {
            fields
                .entry("created_at")
                .or_insert_with(|| json!(Utc::now().to_rfc3339()));
        }

        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }
}

/// Key/value cache with per-entry expiry
#[derive(Debug)]
pub struct InMemoryCache {
    entries: DashMap<String, (Value, Option<Instant>)>,
    connected: ConnectionFlag,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            connected: ConnectionFlag::new(),
        }
    }
}

#[async_trait]
impl Collaborator for InMemoryCache {
    fn name(&self) -> &str {
        "cache"
    }

    async fn connect(&self) -> Result<()> {
        self.connected.set(true);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.set(false);
        self.entries.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.connected.ensure(self.name())
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.connected.ensure(self.name())?;

        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) => match entry.1 {
                Some(deadline) if Instant::now() >= deadline => true,
                _ => return Ok(Some(entry.0.clone())),
            },
        };

        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.connected.ensure(self.name())?;
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), (value, deadline));
        Ok(())
    }
}

/// Executor that answers from a template instead of calling an LLM
#[derive(Debug, Clone)]
pub struct CannedExecutor {
    template: String,
}

impl Default for CannedExecutor {
    fn default() -> Self {
        Self {
            template: "{agent} received your request ({intent}) and is preparing an answer."
                .to_string(),
        }
    }
}

impl CannedExecutor {
    /// `{agent}`, `{intent}` and `{task}` are substituted from the request context
    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl Collaborator for CannedExecutor {
    fn name(&self) -> &str {
        "executor"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for CannedExecutor {
    async fn execute(&self, task: &str, context: &Value) -> Result<String> {
        let agent = context
            .pointer("/agent/name")
            .and_then(Value::as_str)
            .unwrap_or("agent");
        let intent = context
            .get("intent")
            .and_then(Value::as_str)
            .unwrap_or("general_inquiry");

        Ok(self
            .template
            .replace("{agent}", agent)
            .replace("{intent}", intent)
            .replace("{task}", task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_filters_and_orders_newest_first() {
        let store = InMemoryStore::default();
        store.connect().await.unwrap();
        for n in 0..4 {
            let user = if n % 2 == 0 { "u1" } else { "u2" };
            store
                .write("campaigns", json!({"user_id": user, "n": n}))
                .await
                .unwrap();
        }

        let mut filter = RecordFilter::new();
        filter.insert("user_id".into(), json!("u1"));
        let rows = store.read("campaigns", &filter, 10).await.unwrap();
        let ns: Vec<_> = rows.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![2, 0]);
        assert!(rows[0].get("created_at").is_some());

        let limited = store.read("campaigns", &RecordFilter::new(), 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert!(store.read("missing", &filter, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_requires_connection() {
        let store = InMemoryStore::default();
        assert!(store.write("t", json!({})).await.is_err());
        assert!(store.ping().await.is_err());
        store.connect().await.unwrap();
        assert!(store.write("t", json!("scalar")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiry() {
        let cache = InMemoryCache::default();
        cache.connect().await.unwrap();
        cache
            .set("agent:M1", json!({"id": "M1"}), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        cache.set("forever", json!(1), None).await.unwrap();

        assert_eq!(cache.get("agent:M1").await.unwrap(), Some(json!({"id": "M1"})));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("agent:M1").await.unwrap(), None);
        assert_eq!(cache.get("forever").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_canned_executor_substitutes_context() {
        let executor = CannedExecutor::with_template("{agent}|{intent}|{task}");
        let context = json!({"agent": {"name": "Data Analyst"}, "intent": "data_analysis"});
        let reply = executor.execute("show numbers", &context).await.unwrap();
        assert_eq!(reply, "Data Analyst|data_analysis|show numbers");
    }
}
