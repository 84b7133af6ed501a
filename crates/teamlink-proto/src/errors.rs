//! Codec errors.

use thiserror::Error;

/// Failures turning messages into bytes and back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// CBOR serialization failed
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// Bytes were not a valid CBOR message of the expected shape
    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
