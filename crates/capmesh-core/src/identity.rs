//! Instance identity: who a running registry process is.
//!
//! Identity is derived once per process lifetime and treated purely as a
//! provenance tag and resolver tie-breaker, never as a credential. A
//! restart yielding a fresh identifier is acceptable by design.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of hash bytes kept in an instance id (32 hex characters).
const ID_BYTES: usize = 16;

/// A stable identifier for a running instance.
///
/// Lowercase hex, fixed length. Lexicographic comparison of the hex form
/// is the deterministic tie-break used by the conflict resolver, so the
/// ordering must be identical on every instance.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Derive a fresh id for this process.
    ///
    /// Hashes hostname, pid, and process start time together with random
    /// bytes; long enough that collision between live instances is
    /// negligible.
    pub fn derive() -> Self {
        use rand::RngCore;

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"capmesh/instance-id/v1");
        if let Ok(host) = std::env::var("HOSTNAME") {
            hasher.update(host.as_bytes());
        }
        hasher.update(&std::process::id().to_le_bytes());
        let start_nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        hasher.update(&start_nanos.to_le_bytes());
        let mut seed = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut seed);
        hasher.update(&seed);

        let hash = hasher.finalize();
        Self(hex::encode(&hash.as_bytes()[..ID_BYTES]))
    }

    /// Wrap an id received over the wire or built in tests.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// The hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the local process: id plus a free-form classification tag
/// from configuration ("edge", "cloud", "desktop", ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub instance_id: InstanceId,
    pub instance_type: String,
    pub started_at: i64,
}

impl InstanceInfo {
    /// Derive identity for this process with the given classification.
    pub fn derive(instance_type: impl Into<String>, started_at: i64) -> Self {
        Self {
            instance_id: InstanceId::derive(),
            instance_type: instance_type.into(),
            started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_produces_distinct_ids() {
        let a = InstanceId::derive();
        let b = InstanceId::derive();
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_is_fixed_length_hex() {
        let id = InstanceId::derive();
        assert_eq!(id.as_str().len(), ID_BYTES * 2);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = InstanceId::from_string("aaaa".into());
        let b = InstanceId::from_string("bbbb".into());
        assert!(b > a);
    }

    #[test]
    fn test_serde_transparent() {
        let id = InstanceId::from_string("cafe".into());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"cafe\"");
    }
}
