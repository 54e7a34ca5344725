//! # Capmesh Sync
//!
//! The peer synchronization protocol: registry, transport, coordinator,
//! discovery, and scheduler.
//!
//! ## Key Properties
//!
//! - **Idempotent**: applying a manifest twice leaves the store unchanged
//! - **Commutative**: delivery order does not affect the converged state
//! - **Partition-tolerant**: a peer's watermark only advances on success,
//!   so the full pending delta is re-sent after an outage
//! - **Contained failures**: one unreachable peer never fails a round
//!
//! ## Cycle Flow
//!
//! ```text
//! Instance A                              Instance B
//!   |-------- GET /identity --------------->|   handshake
//!   |<------- { instanceId, ... } ----------|
//!   |-------- GET /records?since=W -------->|   pull
//!   |<------- { records: [...] } -----------|   (applied via resolver)
//!   |-------- POST /records --------------->|   push of local delta
//!   |<------- { accepted, rejected, ... } --|
//! ```
//!
//! On success both directions, A sets B's `lastSyncAt = now`; on any
//! failure the watermark stays put and the next round retries the same
//! superset delta.

pub mod client;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod manifest;
pub mod peers;
pub mod scheduler;
pub mod server;

pub use client::{ClientConfig, SyncClient};
pub use coordinator::{CycleReport, RoundReport, SyncCoordinator};
pub use discovery::Discovery;
pub use error::{Result, SyncError};
pub use manifest::{
    limits, Announcement, IdentityDocument, PullResponse, PushSummary, SyncManifest,
};
pub use peers::{IdentityUpdate, PeerDescriptor, PeerRegistry};
pub use scheduler::Scheduler;
pub use server::{build_router, serve, ServerState};
