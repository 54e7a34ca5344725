//! Test fixtures and helpers.
//!
//! Common setup code for unit and integration tests.

use serde_json::{json, Value};

use capmesh_core::{InstanceId, Record};
use capmesh_store::MemoryStore;

/// A deterministic instance id for tests. The tag doubles as the
/// lexicographic tie-break value, so `"bb"` beats `"aa"`.
pub fn instance_id(tag: &str) -> InstanceId {
    InstanceId::from_string(tag.to_string())
}

/// Build a record with a synthetic payload.
pub fn record(key: &str, version: u64, updated_at: i64, origin: &str) -> Record {
    record_with_payload(key, version, updated_at, origin, json!({ "origin": origin }))
}

/// Build a record with an explicit payload.
pub fn record_with_payload(
    key: &str,
    version: u64,
    updated_at: i64,
    origin: &str,
    payload: Value,
) -> Record {
    Record {
        key: key.to_string(),
        payload,
        version,
        updated_at,
        origin_instance: instance_id(origin),
    }
}

/// An identity plus an in-memory store, the smallest thing that can
/// participate in a sync exchange.
pub struct TestInstance {
    pub id: InstanceId,
    pub store: MemoryStore,
}

impl TestInstance {
    pub fn new(tag: &str) -> Self {
        Self {
            id: instance_id(tag),
            store: MemoryStore::new(),
        }
    }
}

/// Create several instances with ids `i0`, `i1`, ... for multi-party
/// tests.
pub fn multi_instances(count: usize) -> Vec<TestInstance> {
    (0..count).map(|i| TestInstance::new(&format!("i{i}"))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use capmesh_store::{ApplyOutcome, RecordStore};

    #[test]
    fn test_record_fixture_is_valid() {
        let r = record("cap.search", 1, 1000, "aa");
        assert!(r.validate().is_ok());
    }

    #[tokio::test]
    async fn test_instance_fixture_applies() {
        let instance = TestInstance::new("aa");
        let outcome = instance
            .store
            .apply(&record("k", 1, 1000, "bb"))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
    }

    #[test]
    fn test_multi_instances_are_distinct() {
        let instances = multi_instances(3);
        assert_ne!(instances[0].id, instances[1].id);
        assert_ne!(instances[1].id, instances[2].id);
    }
}
