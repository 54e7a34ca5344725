//! Error types for capmesh core.

use thiserror::Error;

/// Core errors that can occur during record and identity operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors for record structure.
///
/// Raised at the `put`/`push` boundary; a record that fails validation is
/// rejected in full and never partially applied.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("record key is empty")]
    EmptyKey,

    #[error("record version must be at least 1")]
    ZeroVersion,

    #[error("record origin instance is empty")]
    EmptyOrigin,

    #[error("record timestamp is negative: {0}")]
    NegativeTimestamp(i64),
}
