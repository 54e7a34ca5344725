//! Canonical encoding of a record batch for signing.
//!
//! A manifest signature covers the records it carries, not their JSON
//! presentation, so both ends must derive identical bytes from the same
//! batch. Records are encoded as a CBOR array of maps with integer keys
//! emitted in ascending order, prefixed with a domain-separation string.
//!
//! The payload is folded in as its serde_json string form; serde_json
//! serializes object keys in sorted order, so re-parsing a payload on the
//! receiving side yields the same string.

use ciborium::value::Value;

use crate::error::CoreError;
use crate::record::Record;

/// Domain prefix for manifest signatures.
pub const SIGN_DOMAIN: &[u8] = b"capmesh/manifest-sig/v1";

mod keys {
    pub const KEY: u64 = 0;
    pub const PAYLOAD: u64 = 1;
    pub const VERSION: u64 = 2;
    pub const UPDATED_AT: u64 = 3;
    pub const ORIGIN: u64 = 4;
}

/// Compute the bytes a manifest signature covers.
///
/// The batch is encoded in the order given; the sender and receiver both
/// sign/verify the records exactly as they appear in the manifest.
pub fn manifest_signing_bytes(records: &[Record]) -> Result<Vec<u8>, CoreError> {
    let entries: Result<Vec<Value>, CoreError> =
        records.iter().map(record_to_cbor_value).collect();

    let mut buf = Vec::from(SIGN_DOMAIN);
    ciborium::into_writer(&Value::Array(entries?), &mut buf)
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}

fn record_to_cbor_value(record: &Record) -> Result<Value, CoreError> {
    let payload_json = serde_json::to_string(&record.payload)
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;

    // Integer keys in ascending order; ciborium preserves entry order.
    Ok(Value::Map(vec![
        (
            Value::Integer(keys::KEY.into()),
            Value::Text(record.key.clone()),
        ),
        (Value::Integer(keys::PAYLOAD.into()), Value::Text(payload_json)),
        (
            Value::Integer(keys::VERSION.into()),
            Value::Integer(record.version.into()),
        ),
        (
            Value::Integer(keys::UPDATED_AT.into()),
            Value::Integer(record.updated_at.into()),
        ),
        (
            Value::Integer(keys::ORIGIN.into()),
            Value::Text(record.origin_instance.as_str().to_string()),
        ),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InstanceId;
    use serde_json::json;

    fn record(key: &str, version: u64) -> Record {
        Record {
            key: key.into(),
            payload: json!({"b": 2, "a": 1}),
            version,
            updated_at: 1_736_870_400_000,
            origin_instance: InstanceId::from_string("aabbccdd".into()),
        }
    }

    #[test]
    fn test_signing_bytes_deterministic() {
        let batch = vec![record("x", 1), record("y", 2)];
        let b1 = manifest_signing_bytes(&batch).unwrap();
        let b2 = manifest_signing_bytes(&batch).unwrap();
        assert_eq!(b1, b2);
    }

    #[test]
    fn test_signing_bytes_cover_every_field() {
        let base = manifest_signing_bytes(&[record("x", 1)]).unwrap();

        let mut bumped = record("x", 1);
        bumped.version = 2;
        assert_ne!(base, manifest_signing_bytes(&[bumped]).unwrap());

        let mut retimed = record("x", 1);
        retimed.updated_at += 1;
        assert_ne!(base, manifest_signing_bytes(&[retimed]).unwrap());

        let mut reowned = record("x", 1);
        reowned.origin_instance = InstanceId::from_string("other".into());
        assert_ne!(base, manifest_signing_bytes(&[reowned]).unwrap());
    }

    #[test]
    fn test_payload_key_order_does_not_matter() {
        // serde_json sorts object keys, so two JSON spellings of the same
        // object sign identically.
        let mut a = record("x", 1);
        a.payload = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let mut b = record("x", 1);
        b.payload = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();

        assert_eq!(
            manifest_signing_bytes(&[a]).unwrap(),
            manifest_signing_bytes(&[b]).unwrap()
        );
    }

    #[test]
    fn test_domain_prefix_exact() {
        let bytes = manifest_signing_bytes(&[]).unwrap();
        assert!(bytes.starts_with(SIGN_DOMAIN));
        assert_eq!(SIGN_DOMAIN, b"capmesh/manifest-sig/v1");
    }
}
