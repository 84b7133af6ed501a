//! Connection error types.
//!
//! [`ConnectionError`] covers misuse of the public API and undecodable
//! transport input. Protocol failures are not errors at this level: they are
//! reported through `LocalError` / `RemoteError` events and end the
//! connection.

use teamlink_crypto::CryptoError;
use teamlink_proto::ProtocolError;
use thiserror::Error;

/// Errors returned by [`crate::Connection`] methods.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// `send` was called before a session key was negotiated
    #[error("can't send encrypted messages until we've finished connecting")]
    NotConnected,

    /// `send` was called after the connection ended
    #[error("connection is closed")]
    Disconnected,

    /// A method that needs a running connection was called before `start`
    #[error("connection has not been started")]
    NotStarted,

    /// Transport bytes were not a numbered connection message
    #[error("undecodable message from transport: {0}")]
    Decode(#[from] ProtocolError),

    /// Encrypting an application payload failed
    #[error("failed to encrypt payload: {0}")]
    Encrypt(#[from] CryptoError),
}

/// Internal fault raised inside a machine action.
///
/// Faults are never surfaced as-is: the machine logs them and fails the
/// connection with `UNHANDLED`.
#[derive(Debug, Error)]
pub(crate) enum Fault {
    #[error("team operation failed: {0}")]
    Team(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("missing {0} in connection context")]
    MissingContext(&'static str),
}

impl Fault {
    pub(crate) fn team<E: std::error::Error>(error: E) -> Self {
        Self::Team(error.to_string())
    }
}
