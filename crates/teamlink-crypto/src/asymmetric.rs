//! Authenticated asymmetric box between two X25519 keypairs.
//!
//! The sender combines its secret encryption key with the recipient's public
//! key; the recipient combines its secret key with the sender's public key.
//! Both arrive at the same Diffie-Hellman secret, which is stretched with
//! HKDF-SHA256 into a symmetric key for [`crate::symmetric`]. Only the holder
//! of one of the two secret keys can open the box, and a successful open
//! proves the box came from the other one.

use x25519_dalek::{PublicKey, StaticSecret};

use crate::{CryptoError, NONCE_SIZE, SecretKey, kdf::derive_key, symmetric};

const BOX_SALT: &[u8] = b"teamlink/asymmetric/v1";
const BOX_INFO: &[u8] = b"box key";

fn box_key(our_secret: &SecretKey, their_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let secret = StaticSecret::from(*our_secret.as_bytes());
    let shared = secret.diffie_hellman(&PublicKey::from(*their_public));

    // A low-order public key yields an all-zero secret that anyone can compute
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("non-contributory public key"));
    }

    derive_key(BOX_SALT, shared.as_bytes(), BOX_INFO)
}

/// Encrypt `plaintext` from `sender_secret_key` to `recipient_public_key`.
pub fn encrypt(
    plaintext: &[u8],
    recipient_public_key: &[u8; 32],
    sender_secret_key: &SecretKey,
    nonce: [u8; NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let key = box_key(sender_secret_key, recipient_public_key)?;
    symmetric::encrypt(plaintext, &key, nonce)
}

/// Open a box sent by `sender_public_key` to `recipient_secret_key`.
pub fn decrypt(
    cipher: &[u8],
    sender_public_key: &[u8; 32],
    recipient_secret_key: &SecretKey,
) -> Result<Vec<u8>, CryptoError> {
    let key = box_key(recipient_secret_key, sender_public_key)?;
    symmetric::decrypt(cipher, &key)
}
