//! The conflict resolver: whole-record last-writer-wins.
//!
//! Resolution is a fixed total order over (version, updated_at,
//! origin_instance). Every instance evaluates the same order, so applying
//! a set of incoming records in any arrival order, or applying the same
//! record twice, converges to the same state. No payload merge is
//! attempted; the losing record is discarded in full.

use std::cmp::Ordering;

use crate::record::Record;

/// Compare two records with the same key under the resolution order.
///
/// Greater means "wins". The payload never participates.
pub fn resolution_order(a: &Record, b: &Record) -> Ordering {
    a.version
        .cmp(&b.version)
        .then_with(|| a.updated_at.cmp(&b.updated_at))
        .then_with(|| a.origin_instance.cmp(&b.origin_instance))
}

/// Decide which of a local and an incoming record survives.
///
/// Rules, in order:
/// 1. higher `version` wins;
/// 2. equal versions: strictly later `updated_at` wins (clock skew is
///    tolerated because step 3 still breaks exact ties);
/// 3. equal version and timestamp: the lexicographically higher
///    `origin_instance` wins.
///
/// When every component is equal the local record is kept, which makes
/// re-delivery of an identical record a no-op.
pub fn resolve<'a>(local: &'a Record, incoming: &'a Record) -> &'a Record {
    if supersedes(incoming, local) {
        incoming
    } else {
        local
    }
}

/// True when `incoming` strictly beats `stored` under the resolution
/// order. This is the store's apply gate: anything that does not strictly
/// win is ignored, which gives idempotence for free.
pub fn supersedes(incoming: &Record, stored: &Record) -> bool {
    resolution_order(incoming, stored) == Ordering::Greater
}
