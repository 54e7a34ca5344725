//! Proptest generators and the protocol's property suites.

use proptest::prelude::*;
use serde_json::json;

use capmesh_core::{InstanceId, Record};

/// Generate a registry key.
pub fn record_key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9.]{0,15}".prop_map(String::from)
}

/// Generate an instance id in its hex shape.
pub fn origin() -> impl Strategy<Value = InstanceId> {
    "[0-9a-f]{8}".prop_map(InstanceId::from_string)
}

/// Generate a record version.
pub fn version() -> impl Strategy<Value = u64> {
    1u64..=20
}

/// Generate an update timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    1_000i64..=1_000_000
}

/// Build a record whose payload is a function of its metadata, so records
/// that tie completely under the resolution order are identical. Real
/// writers uphold the same invariant by bumping the version on every
/// mutation.
pub fn make_record(key: String, version: u64, updated_at: i64, origin: InstanceId) -> Record {
    Record {
        payload: json!({
            "v": version,
            "t": updated_at,
            "o": origin.as_str(),
        }),
        key,
        version,
        updated_at,
        origin_instance: origin,
    }
}

/// Generate a single record.
pub fn record() -> impl Strategy<Value = Record> {
    (record_key(), version(), timestamp(), origin())
        .prop_map(|(key, v, t, o)| make_record(key, v, t, o))
}

/// Generate a batch of records drawn from a small key pool, so key
/// collisions (and therefore resolution) actually happen.
pub fn record_batch(max_len: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec((0usize..4, version(), timestamp(), origin()), 1..=max_len).prop_map(
        |entries| {
            entries
                .into_iter()
                .map(|(k, v, t, o)| make_record(format!("k{k}"), v, t, o))
                .collect()
        },
    )
}
