//! Error types for the node facade.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the node facade.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] capmesh_store::StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] capmesh_sync::SyncError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
