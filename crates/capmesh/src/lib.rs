//! # Capmesh
//!
//! Federated capability-registry synchronization: independent instances
//! of a registry service converge on the same record set through pairwise
//! HTTP exchange, without a central database.
//!
//! This facade crate wires identity, storage, and the sync protocol into
//! a [`Node`]:
//!
//! ```rust,no_run
//! use capmesh::{Node, NodeConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! capmesh::telemetry::init_tracing();
//!
//! let node = Node::start(NodeConfig::from_env()?).await?;
//! node.write("cap.search", serde_json::json!({"kind": "tool"})).await?;
//! node.add_peer("http://other-host:7411");
//!
//! let report = node.sync_now().await;
//! println!("synced with {} peers", report.successes());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod node;
pub mod telemetry;

pub use config::{ConfigError, NodeConfig, TopologyMode};
pub use error::{NodeError, Result};
pub use node::Node;

// Re-export the types a collaborator sees in return values.
pub use capmesh_core::{InstanceId, InstanceInfo, Record};
pub use capmesh_sync::{CycleReport, PeerDescriptor, PushSummary, RoundReport};
