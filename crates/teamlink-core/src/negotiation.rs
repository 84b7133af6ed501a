//! Session seed exchange.
//!
//! Each side boxes a random seed for the other side's device encryption key.
//! Once both seeds are known, the session key is derived from the pair. A box
//! that does not open with the keys the team expects means the peer does not
//! hold them, which is reported as `ENCRYPTION_FAILURE` rather than as an
//! internal fault.

use teamlink_crypto::{CryptoError, NONCE_SIZE, SEED_SIZE, SessionKey, asymmetric, derive_shared_key};
use teamlink_proto::{Device, DeviceWithSecrets};

/// Box `seed` from our device to theirs.
pub fn encrypt_seed(
    seed: &[u8; SEED_SIZE],
    our_device: &DeviceWithSecrets,
    their_device: &Device,
    nonce: [u8; NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    asymmetric::encrypt(
        seed,
        &their_device.keys.encryption,
        &our_device.keys.encryption.secret_key,
        nonce,
    )
}

/// Open the peer's seed box and derive the session key.
pub fn derive_session_key(
    our_seed: &[u8; SEED_SIZE],
    encrypted_seed: &[u8],
    our_device: &DeviceWithSecrets,
    their_device: &Device,
) -> Result<SessionKey, CryptoError> {
    let their_seed = asymmetric::decrypt(
        encrypted_seed,
        &their_device.keys.encryption,
        &our_device.keys.encryption.secret_key,
    )?;
    derive_shared_key(our_seed, &their_seed)
}

/// Whether a negotiation failure means the peer used the wrong key pair.
pub fn is_wrong_key(error: &CryptoError) -> bool {
    matches!(error, CryptoError::DecryptionFailed | CryptoError::InvalidKey(_))
}

#[cfg(test)]
mod tests {
    use teamlink_crypto::KeysetWithSecrets;

    use super::*;

    fn device(id: &str, secret: u8) -> DeviceWithSecrets {
        DeviceWithSecrets {
            user_id: id.into(),
            device_id: id.into(),
            device_name: id.into(),
            keys: KeysetWithSecrets::from_secret_bytes(id, &[secret; 64]),
            device_info: None,
        }
    }

    #[test]
    fn both_sides_derive_the_same_key() {
        let alice = device("alice", 1);
        let bob = device("bob", 2);
        let alice_seed = [10u8; SEED_SIZE];
        let bob_seed = [20u8; SEED_SIZE];

        let to_bob = encrypt_seed(&alice_seed, &alice, &bob.redact(), [0u8; NONCE_SIZE]).unwrap();
        let to_alice = encrypt_seed(&bob_seed, &bob, &alice.redact(), [1u8; NONCE_SIZE]).unwrap();

        let at_bob = derive_session_key(&bob_seed, &to_bob, &bob, &alice.redact()).unwrap();
        let at_alice = derive_session_key(&alice_seed, &to_alice, &alice, &bob.redact()).unwrap();
        assert_eq!(at_alice, at_bob);
    }

    #[test]
    fn box_under_other_keys_is_wrong_key() {
        let alice = device("alice", 1);
        let bob = device("bob", 2);
        let eve = device("bob", 3);

        // Eve claims to be Bob but owns different encryption keys
        let boxed = encrypt_seed(&[5u8; SEED_SIZE], &eve, &alice.redact(), [0u8; NONCE_SIZE]).unwrap();
        let err = derive_session_key(&[6u8; SEED_SIZE], &boxed, &alice, &bob.redact()).unwrap_err();
        assert!(is_wrong_key(&err));
    }

    #[test]
    fn truncated_box_is_not_a_key_problem() {
        let alice = device("alice", 1);
        let bob = device("bob", 2);
        let err = derive_session_key(&[6u8; SEED_SIZE], b"short", &alice, &bob.redact()).unwrap_err();
        assert!(!is_wrong_key(&err));
    }
}
