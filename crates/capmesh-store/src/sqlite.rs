//! SQLite implementation of the RecordStore trait.
//!
//! The durable backend. Uses rusqlite with bundled SQLite, wrapped in
//! async via tokio::task::spawn_blocking so store calls never block the
//! runtime.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use capmesh_core::{supersedes, InstanceId, Record};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{ApplyOutcome, RecordStore};

/// SQLite-based store implementation.
///
/// The connection lives behind a Mutex; the high-water mark is kept in an
/// atomic so reads don't touch the database.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    high_water_mark: Arc<AtomicI64>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed; the high-water mark
    /// is recovered from the stored records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        let mark = load_high_water_mark(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            high_water_mark: Arc::new(AtomicI64::new(mark)),
        })
    }

    /// Open an in-memory SQLite database. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            high_water_mark: Arc::new(AtomicI64::new(0)),
        })
    }
}

fn load_high_water_mark(conn: &Connection) -> Result<i64> {
    let mark: i64 = conn.query_row(
        "SELECT COALESCE(MAX(updated_at), 0) FROM records",
        [],
        |row| row.get(0),
    )?;
    Ok(mark)
}

fn poisoned(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
        Some(format!("mutex poisoned: {}", e)),
    ))
}

fn join_failed(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
        Some(format!("spawn_blocking failed: {}", e)),
    ))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Record, String)> {
    let payload_json: String = row.get("payload")?;
    let origin: String = row.get("origin_instance")?;
    let record = Record {
        key: row.get("key")?,
        payload: Value::Null, // parsed by the caller, which can report errors
        version: row.get::<_, i64>("version")? as u64,
        updated_at: row.get("updated_at")?,
        origin_instance: InstanceId::from_string(origin),
    };
    Ok((record, payload_json))
}

fn parse_payload((mut record, payload_json): (Record, String)) -> Result<Record> {
    record.payload = serde_json::from_str(&payload_json)
        .map_err(|e| StoreError::Serialization(format!("payload for {}: {}", record.key, e)))?;
    Ok(record)
}

fn upsert_record(conn: &Connection, record: &Record) -> Result<()> {
    let payload_json = serde_json::to_string(&record.payload)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO records (key, payload, version, updated_at, origin_instance)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(key) DO UPDATE SET
             payload = excluded.payload,
             version = excluded.version,
             updated_at = excluded.updated_at,
             origin_instance = excluded.origin_instance",
        params![
            record.key,
            payload_json,
            record.version as i64,
            record.updated_at,
            record.origin_instance.as_str(),
        ],
    )?;
    Ok(())
}

fn select_record(conn: &Connection, key: &str) -> Result<Option<Record>> {
    conn.query_row(
        "SELECT key, payload, version, updated_at, origin_instance
         FROM records WHERE key = ?1",
        params![key],
        row_to_record,
    )
    .optional()?
    .map(parse_payload)
    .transpose()
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn apply(&self, record: &Record) -> Result<ApplyOutcome> {
        record.validate()?;

        let record = record.clone();
        let conn = self.conn.clone();
        let mark = self.high_water_mark.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(poisoned)?;

            if let Some(stored) = select_record(&conn, &record.key)? {
                if !supersedes(&record, &stored) {
                    return Ok(ApplyOutcome::Superseded);
                }
            }

            upsert_record(&conn, &record)?;
            mark.fetch_max(record.updated_at, Ordering::SeqCst);
            Ok(ApplyOutcome::Applied)
        })
        .await
        .map_err(join_failed)?
    }

    async fn write_local(
        &self,
        key: &str,
        payload: Value,
        origin: &InstanceId,
    ) -> Result<Record> {
        let key = key.to_string();
        let origin = origin.clone();
        let conn = self.conn.clone();
        let mark = self.high_water_mark.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(poisoned)?;

            let now = now_millis();
            let record = match select_record(&conn, &key)? {
                Some(stored) => stored.succeed(payload, now, origin),
                None => Record::new(key, payload, now, origin),
            };
            record.validate()?;

            upsert_record(&conn, &record)?;
            mark.fetch_max(record.updated_at, Ordering::SeqCst);
            Ok(record)
        })
        .await
        .map_err(join_failed)?
    }

    async fn get(&self, key: &str) -> Result<Option<Record>> {
        let key = key.to_string();
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(poisoned)?;
            select_record(&conn, &key)
        })
        .await
        .map_err(join_failed)?
    }

    async fn all(&self) -> Result<Vec<Record>> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(poisoned)?;
            let mut stmt = conn.prepare(
                "SELECT key, payload, version, updated_at, origin_instance FROM records",
            )?;
            let rows = stmt.query_map([], row_to_record)?;
            rows.map(|r| parse_payload(r?)).collect()
        })
        .await
        .map_err(join_failed)?
    }

    async fn delta(&self, since: i64) -> Result<Vec<Record>> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(poisoned)?;
            let mut stmt = conn.prepare(
                "SELECT key, payload, version, updated_at, origin_instance
                 FROM records WHERE updated_at > ?1 ORDER BY updated_at",
            )?;
            let rows = stmt.query_map(params![since], row_to_record)?;
            rows.map(|r| parse_payload(r?)).collect()
        })
        .await
        .map_err(join_failed)?
    }

    async fn high_water_mark(&self) -> Result<i64> {
        Ok(self.high_water_mark.load(Ordering::SeqCst))
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn origin(s: &str) -> InstanceId {
        InstanceId::from_string(s.to_string())
    }

    fn record(key: &str, version: u64, updated_at: i64, org: &str) -> Record {
        Record {
            key: key.into(),
            payload: json!({"n": version}),
            version,
            updated_at,
            origin_instance: origin(org),
        }
    }

    #[tokio::test]
    async fn test_apply_get_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let r = record("cap.search", 1, 1000, "aa");

        assert_eq!(store.apply(&r).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(store.get("cap.search").await.unwrap().unwrap(), r);
    }

    #[tokio::test]
    async fn test_apply_resolution_gate() {
        let store = SqliteStore::open_memory().unwrap();
        store.apply(&record("x", 2, 2000, "aa")).await.unwrap();

        // Stale loses, equal-version-later-timestamp wins.
        assert_eq!(
            store.apply(&record("x", 1, 9000, "zz")).await.unwrap(),
            ApplyOutcome::Superseded
        );
        assert_eq!(
            store.apply(&record("x", 2, 3000, "bb")).await.unwrap(),
            ApplyOutcome::Applied
        );
        let stored = store.get("x").await.unwrap().unwrap();
        assert_eq!(stored.updated_at, 3000);
    }

    #[tokio::test]
    async fn test_write_local_then_delta() {
        let store = SqliteStore::open_memory().unwrap();
        let id = origin("aa");

        store.write_local("a", json!(1), &id).await.unwrap();
        let r = store.write_local("a", json!(2), &id).await.unwrap();
        assert_eq!(r.version, 2);

        let delta = store.delta(0).await.unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].version, 2);

        assert!(store.delta(r.updated_at).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capmesh.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.apply(&record("x", 1, 4200, "aa")).await.unwrap();
            assert_eq!(store.high_water_mark().await.unwrap(), 4200);
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.high_water_mark().await.unwrap(), 4200);
        assert_eq!(reopened.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_payload_json_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let mut r = record("x", 1, 1000, "aa");
        r.payload = json!({"nested": {"list": [1, 2, 3]}, "s": "text"});

        store.apply(&r).await.unwrap();
        assert_eq!(store.get("x").await.unwrap().unwrap().payload, r.payload);
    }
}
