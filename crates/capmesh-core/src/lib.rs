//! # Capmesh Core
//!
//! Pure primitives for capmesh: records, instance identity, and conflict
//! resolution.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over the replicated data model.
//!
//! ## Key Types
//!
//! - [`Record`] - The unit of replication: a versioned key/payload entry
//! - [`InstanceId`] - Identity of a running registry instance
//! - [`resolve`] - The last-writer-wins conflict resolver
//!
//! ## Resolution
//!
//! Conflicts between two versions of the same key are decided by a fixed
//! total order: version, then update timestamp, then origin instance id.
//! See [`resolve`] for the exact rules.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod record;
pub mod resolve;

pub use canonical::manifest_signing_bytes;
pub use crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, ValidationError};
pub use identity::{InstanceId, InstanceInfo};
pub use record::Record;
pub use resolve::{resolution_order, resolve, supersedes};
