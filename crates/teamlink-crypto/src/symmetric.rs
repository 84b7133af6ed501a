//! Symmetric box under a 32 byte key.
//!
//! XChaCha20-Poly1305 with a caller-supplied 24 byte nonce. The nonce is
//! prepended to the ciphertext so decryption needs only the key.

use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::{CryptoError, NONCE_SIZE};

/// Poly1305 tag length.
const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under `key`. Output is `nonce || ciphertext`.
pub fn encrypt(
    plaintext: &[u8],
    key: &[u8; 32],
    nonce: [u8; NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a `nonce || ciphertext` produced by [`encrypt`].
pub fn decrypt(cipher_bytes: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let min = NONCE_SIZE + TAG_SIZE;
    if cipher_bytes.len() < min {
        return Err(CryptoError::MalformedCiphertext { len: cipher_bytes.len(), min });
    }

    let (nonce, sealed) = cipher_bytes.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher.decrypt(XNonce::from_slice(nonce), sealed).map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_key_is_decryption_failure() {
        let sealed = encrypt(b"hello", &[1u8; 32], [9u8; NONCE_SIZE]).unwrap();
        assert_eq!(decrypt(&sealed, &[1u8; 32]).unwrap(), b"hello");
        assert_eq!(decrypt(&sealed, &[2u8; 32]), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn truncated_input_is_malformed() {
        let result = decrypt(&[0u8; 10], &[1u8; 32]);
        assert!(matches!(result, Err(CryptoError::MalformedCiphertext { len: 10, .. })));
    }
}
