//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during sync operations.
///
/// Transport and timeout failures are recorded against the peer they
/// occurred with and contained inside that peer's cycle; they never fail
/// a whole round.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection-level failure: refused, DNS, TLS.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The peer answered with a non-success HTTP status.
    #[error("peer returned HTTP {status}")]
    Http { status: u16 },

    /// A manifest failed structural checks (size limits, missing fields).
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// A manifest signature was required but missing or wrong.
    #[error("manifest signature rejected: {0}")]
    SignatureRejected(String),

    /// A configured peer endpoint turned out to be this instance.
    #[error("endpoint belongs to this instance")]
    SelfEndpoint,

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] capmesh_store::StoreError),

    /// Record validation failed.
    #[error("validation error: {0}")]
    Validation(#[from] capmesh_core::ValidationError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
