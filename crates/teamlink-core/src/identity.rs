//! Signature challenges.
//!
//! A member proves it controls the device it claims by signing a fresh
//! challenge with that device's signature key. The verifier checks the
//! signature against the device's public key as recorded on the team.

use teamlink_crypto::{Keyset, KeysetWithSecrets, signature};
use teamlink_proto::{Challenge, ProtocolError, encode};

/// A new challenge for `device_id`.
pub fn challenge(device_id: &str, nonce: [u8; 32]) -> Challenge {
    Challenge { device_id: device_id.to_owned(), nonce }
}

/// Sign `challenge` with our device signature key.
pub fn prove(challenge: &Challenge, keys: &KeysetWithSecrets) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode(challenge)?;
    Ok(signature::sign(&payload, &keys.signature.secret_key))
}

/// Check `proof` over `challenge` against the public keys `keys`.
///
/// Malformed signatures and keys simply fail verification.
pub fn verify(challenge: &Challenge, proof: &[u8], keys: &Keyset) -> bool {
    let Ok(payload) = encode(challenge) else {
        return false;
    };
    signature::verify(&payload, proof, &keys.signature).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_verifies_with_matching_keys_only() {
        let device = KeysetWithSecrets::from_secret_bytes("alice-laptop", &[1u8; 64]);
        let impostor = KeysetWithSecrets::from_secret_bytes("alice-laptop", &[2u8; 64]);
        let challenge = challenge("alice-laptop", [7u8; 32]);

        let proof = prove(&challenge, &device).unwrap();
        assert!(verify(&challenge, &proof, &device.redact()));
        assert!(!verify(&challenge, &proof, &impostor.redact()));

        let forged = prove(&challenge, &impostor).unwrap();
        assert!(!verify(&challenge, &forged, &device.redact()));
    }

    #[test]
    fn proof_is_bound_to_the_nonce() {
        let device = KeysetWithSecrets::from_secret_bytes("alice-laptop", &[1u8; 64]);
        let proof = prove(&challenge("alice-laptop", [7u8; 32]), &device).unwrap();

        assert!(!verify(&challenge("alice-laptop", [8u8; 32]), &proof, &device.redact()));
        assert!(!verify(&challenge("alice-laptop", [7u8; 32]), b"short", &device.redact()));
    }
}
