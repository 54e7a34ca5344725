//! # Capmesh Store
//!
//! Durable key→record storage behind the [`RecordStore`] trait.
//!
//! Two backends with identical semantics:
//!
//! - [`MemoryStore`] — in-process, for tests and ephemeral nodes
//! - [`SqliteStore`] — rusqlite with bundled SQLite, for durable nodes
//!
//! The remote write path ([`RecordStore::apply`]) is gated by the conflict
//! resolver's total order: a record that does not strictly beat the stored
//! one is silently ignored, which makes every apply idempotent and safe to
//! retry. The local write path ([`RecordStore::write_local`]) bumps
//! version, timestamp, and origin on behalf of the caller.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{ApplyOutcome, RecordStore};
