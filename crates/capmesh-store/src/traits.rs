//! RecordStore trait: the abstract interface for record persistence.
//!
//! This trait keeps the sync layer storage-agnostic. Implementations
//! include SQLite (durable) and in-memory (tests, ephemeral nodes).

use async_trait::async_trait;
use serde_json::Value;

use capmesh_core::{InstanceId, Record};

use crate::error::Result;

/// Result of applying a remotely produced record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The incoming record won resolution and replaced (or created) the
    /// stored entry.
    Applied,
    /// The incoming record lost resolution, or was an exact duplicate;
    /// stored state is unchanged. Not an error.
    Superseded,
}

/// Async interface for record persistence.
///
/// # Design Notes
///
/// - **Resolver-gated applies**: `apply` only mutates state when the
///   incoming record strictly beats the stored one under the resolution
///   order, so duplicate and stale deliveries are no-ops.
/// - **No partial application**: a record either fully replaces the stored
///   entry or leaves it untouched; validation failures reject the record
///   before anything is written.
/// - **High-water mark**: the maximum `updated_at` ever applied or written,
///   kept in memory and used as the default watermark for outgoing deltas.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Apply a record received from a peer.
    ///
    /// Validates the record, then applies it iff it supersedes the stored
    /// entry for the same key. A missing key always applies.
    async fn apply(&self, record: &Record) -> Result<ApplyOutcome>;

    /// Write a local mutation on behalf of a collaborator.
    ///
    /// Bumps `version` (stored + 1, or 1 for a new key), stamps
    /// `updated_at` with the current wall clock, and sets the origin.
    /// Returns the stored record.
    async fn write_local(
        &self,
        key: &str,
        payload: Value,
        origin: &InstanceId,
    ) -> Result<Record>;

    /// Get a record by key.
    async fn get(&self, key: &str) -> Result<Option<Record>>;

    /// All records, in unspecified order.
    async fn all(&self) -> Result<Vec<Record>>;

    /// All records with `updated_at > since`, used to build outgoing
    /// manifests.
    async fn delta(&self, since: i64) -> Result<Vec<Record>>;

    /// The highest `updated_at` observed through any successful mutation.
    /// Zero for an empty store.
    async fn high_water_mark(&self) -> Result<i64>;
}
