//! Keysets.
//!
//! A keyset bundles a signature keypair (Ed25519) and an encryption keypair
//! (X25519) under a name, usually the id of the user, device or server that
//! owns it. [`Keyset`] is the public half that may be transmitted;
//! [`KeysetWithSecrets`] additionally holds the secret keys and never leaves
//! the local device.

use std::fmt;

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 32 bytes of secret key material, zeroised on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not reveal secret values when printing debug info.
        f.write_str("SecretKey(***)")
    }
}

/// A public key together with its secret key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    /// Public half
    pub public_key: [u8; 32],
    /// Secret half
    pub secret_key: SecretKey,
}

impl KeyPair {
    /// Ed25519 keypair from a secret seed.
    pub fn signature_from_secret(secret: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&secret);
        Self {
            public_key: signing.verifying_key().to_bytes(),
            secret_key: SecretKey::from_bytes(secret),
        }
    }

    /// X25519 keypair from a secret scalar.
    pub fn encryption_from_secret(secret: [u8; 32]) -> Self {
        let static_secret = StaticSecret::from(secret);
        Self {
            public_key: PublicKey::from(&static_secret).to_bytes(),
            secret_key: SecretKey::from_bytes(secret),
        }
    }
}

/// Public keys of a user, device or server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyset {
    /// Owner of the keys (user id, device id or host)
    pub name: String,
    /// Ed25519 verifying key
    pub signature: [u8; 32],
    /// X25519 public key
    pub encryption: [u8; 32],
}

/// Full keyset including secret keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetWithSecrets {
    /// Owner of the keys
    pub name: String,
    /// Signature keypair
    pub signature: KeyPair,
    /// Encryption keypair
    pub encryption: KeyPair,
}

impl KeysetWithSecrets {
    /// Build a keyset from 64 bytes of secret material.
    ///
    /// The first half seeds the signature key, the second half the encryption
    /// key. Callers draw the bytes from their environment's RNG.
    pub fn from_secret_bytes(name: impl Into<String>, secret: &[u8; 64]) -> Self {
        let mut signature = [0u8; 32];
        let mut encryption = [0u8; 32];
        signature.copy_from_slice(&secret[..32]);
        encryption.copy_from_slice(&secret[32..]);

        let keyset = Self {
            name: name.into(),
            signature: KeyPair::signature_from_secret(signature),
            encryption: KeyPair::encryption_from_secret(encryption),
        };
        signature.zeroize();
        encryption.zeroize();
        keyset
    }

    /// Strip the secret keys.
    pub fn redact(&self) -> Keyset {
        Keyset {
            name: self.name.clone(),
            signature: self.signature.public_key,
            encryption: self.encryption.public_key,
        }
    }
}
