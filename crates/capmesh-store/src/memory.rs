//! In-memory implementation of the RecordStore trait.
//!
//! Same semantics as SQLite but nothing survives the process. Thread-safe
//! via RwLock; the write rate of a registry is low enough that a single
//! coarse lock per store is fine.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use capmesh_core::{supersedes, InstanceId, Record};

use crate::error::Result;
use crate::traits::{ApplyOutcome, RecordStore};

/// In-memory store implementation.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    records: HashMap<String, Record>,
    high_water_mark: i64,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                records: HashMap::new(),
                high_water_mark: 0,
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn apply(&self, record: &Record) -> Result<ApplyOutcome> {
        record.validate()?;

        let mut inner = self.inner.write().unwrap();

        if let Some(stored) = inner.records.get(&record.key) {
            if !supersedes(record, stored) {
                return Ok(ApplyOutcome::Superseded);
            }
        }

        inner.high_water_mark = inner.high_water_mark.max(record.updated_at);
        inner.records.insert(record.key.clone(), record.clone());
        Ok(ApplyOutcome::Applied)
    }

    async fn write_local(
        &self,
        key: &str,
        payload: Value,
        origin: &InstanceId,
    ) -> Result<Record> {
        let mut inner = self.inner.write().unwrap();

        let now = now_millis();
        let record = match inner.records.get(key) {
            Some(stored) => stored.succeed(payload, now, origin.clone()),
            None => Record::new(key, payload, now, origin.clone()),
        };
        record.validate()?;

        inner.high_water_mark = inner.high_water_mark.max(record.updated_at);
        inner.records.insert(record.key.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, key: &str) -> Result<Option<Record>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.records.get(key).cloned())
    }

    async fn all(&self) -> Result<Vec<Record>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.records.values().cloned().collect())
    }

    async fn delta(&self, since: i64) -> Result<Vec<Record>> {
        let inner = self.inner.read().unwrap();
        let mut records: Vec<Record> = inner
            .records
            .values()
            .filter(|r| r.updated_at > since)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(records)
    }

    async fn high_water_mark(&self) -> Result<i64> {
        let inner = self.inner.read().unwrap();
        Ok(inner.high_water_mark)
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
