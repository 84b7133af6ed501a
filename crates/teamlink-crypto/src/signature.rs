//! Ed25519 signatures over arbitrary payloads.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

use crate::{CryptoError, SecretKey};

/// Sign `payload` with a secret signature key.
pub fn sign(payload: &[u8], secret_key: &SecretKey) -> Vec<u8> {
    let signing = SigningKey::from_bytes(secret_key.as_bytes());
    signing.sign(payload).to_bytes().to_vec()
}

/// Verify a signature produced by [`sign`].
///
/// Returns `Ok(false)` for a well-formed signature that does not verify and
/// an error only when the key or signature bytes cannot be parsed.
pub fn verify(payload: &[u8], signature: &[u8], public_key: &[u8; 32]) -> Result<bool, CryptoError> {
    let verifying = VerifyingKey::from_bytes(public_key)
        .map_err(|_| CryptoError::InvalidKey("not an ed25519 point"))?;
    let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    Ok(verifying.verify_strict(payload, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    #[test]
    fn signature_binds_key_and_payload() {
        let pair = KeyPair::signature_from_secret([4u8; 32]);
        let other = KeyPair::signature_from_secret([5u8; 32]);
        let sig = sign(b"challenge", &pair.secret_key);

        assert_eq!(verify(b"challenge", &sig, &pair.public_key), Ok(true));
        assert_eq!(verify(b"challenge!", &sig, &pair.public_key), Ok(false));
        assert_eq!(verify(b"challenge", &sig, &other.public_key), Ok(false));
        assert_eq!(verify(b"challenge", &sig[..10], &pair.public_key), Err(CryptoError::InvalidSignature));
    }
}
