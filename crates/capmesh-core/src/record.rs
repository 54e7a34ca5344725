//! The replicated record: a versioned key/payload entry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::identity::InstanceId;

/// A single versioned, replicated registry entry.
///
/// The payload is opaque to the sync core; its semantics belong to the
/// collaborator that writes it. Field names follow the wire format
/// (camelCase) so a serialized record is directly usable in the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable identifier, unique within a store.
    pub key: String,

    /// Opaque content; never inspected by the core.
    pub payload: Value,

    /// Monotonically increasing counter, bumped by the owning instance
    /// on every local mutation.
    pub version: u64,

    /// Unix milliseconds of the last mutation, stamped by the mutating
    /// instance. Monotonic per instance, not globally ordered.
    pub updated_at: i64,

    /// The instance that produced the current value.
    pub origin_instance: InstanceId,
}

impl Record {
    /// Create a record at version 1, as a fresh local write would.
    pub fn new(
        key: impl Into<String>,
        payload: Value,
        updated_at: i64,
        origin: InstanceId,
    ) -> Self {
        Self {
            key: key.into(),
            payload,
            version: 1,
            updated_at,
            origin_instance: origin,
        }
    }

    /// Structural validation, applied at the `put`/`push` boundary.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        if self.version == 0 {
            return Err(ValidationError::ZeroVersion);
        }
        if self.origin_instance.as_str().is_empty() {
            return Err(ValidationError::EmptyOrigin);
        }
        if self.updated_at < 0 {
            return Err(ValidationError::NegativeTimestamp(self.updated_at));
        }
        Ok(())
    }

    /// Produce the successor of this record: version bumped, new payload,
    /// new timestamp and origin.
    pub fn succeed(&self, payload: Value, updated_at: i64, origin: InstanceId) -> Self {
        Self {
            key: self.key.clone(),
            payload,
            version: self.version + 1,
            updated_at,
            origin_instance: origin,
        }
    }
}
