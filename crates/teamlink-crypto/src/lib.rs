//! Cryptographic primitives for the Teamlink connection protocol.
//!
//! Everything in this crate is deterministic given its inputs. Nonces and key
//! material are supplied by the caller (usually from an `Environment`), which
//! keeps the protocol core free of hidden randomness and lets simulations
//! replay a run bit for bit.
//!
//! # Components
//!
//! - [`keys`]: Public and secret keysets for users, devices and servers
//! - [`asymmetric`]: X25519 box between two keysets
//! - [`symmetric`]: XChaCha20-Poly1305 box under a shared secret key
//! - [`signature`]: Ed25519 signing and verification
//! - [`session`]: Commutative session-key derivation
//! - [`invitation`]: Invitation ids, starter keys and proofs
//!
//! # Security
//!
//! Ciphertexts are `nonce || aead(plaintext)`. Authentication failures are
//! reported as [`CryptoError::DecryptionFailed`] and kept distinct from
//! structurally malformed input so callers can tell a wrong key from a
//! corrupted frame.

#![forbid(unsafe_code)]

pub mod asymmetric;
pub mod error;
pub mod hash;
pub mod invitation;
mod kdf;
pub mod keys;
pub mod session;
pub mod signature;
pub mod symmetric;

pub use error::CryptoError;
pub use hash::{Hash, hash};
pub use invitation::{InvitationId, ProofOfInvitation};
pub use keys::{KeyPair, Keyset, KeysetWithSecrets, SecretKey};
pub use session::{SessionKey, derive_shared_key};

/// Size of every nonce used by the boxes in this crate.
pub const NONCE_SIZE: usize = 24;

/// Size of the random seed each peer contributes to the session key.
pub const SEED_SIZE: usize = 32;
