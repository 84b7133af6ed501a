//! Crypto error types.

use thiserror::Error;

/// Errors produced by the primitives in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The AEAD tag did not verify: wrong key pair or tampered ciphertext.
    #[error("decryption failed: incorrect key pair or corrupted ciphertext")]
    DecryptionFailed,

    /// Ciphertext too short to contain a nonce and tag.
    #[error("malformed ciphertext: {len} bytes, need at least {min}")]
    MalformedCiphertext {
        /// Length that was supplied
        len: usize,
        /// Minimum valid length
        min: usize,
    },

    /// Key bytes do not describe a usable key.
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    /// Signature bytes could not be parsed.
    #[error("invalid signature encoding")]
    InvalidSignature,

    /// Encryption itself failed (AEAD backend error).
    #[error("encryption failed")]
    EncryptionFailed,

    /// HKDF refused the requested output length.
    #[error("key derivation failed")]
    KeyDerivation,
}
