//! Invitation ids, starter keys and proofs.
//!
//! An invitation is a short secret seed handed out of band. Both the inviter
//! and the invitee derive the same material from it:
//!
//! - an [`InvitationId`], recorded on the team when the invitation is created
//! - a set of starter keys, whose public signature key is recorded alongside
//!   the id
//!
//! The invitee proves possession of the seed by signing the id with the
//! starter signature key. Anyone holding the team record can check the proof
//! without ever seeing the seed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CryptoError, KeyPair, KeysetWithSecrets, kdf::derive_key, signature};

const INVITATION_SALT: &[u8] = b"teamlink/invitation/v1";

/// Public identifier of an invitation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InvitationId(pub String);

impl fmt::Display for InvitationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof that the presenter knows the seed of invitation `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfInvitation {
    /// Invitation being redeemed
    pub id: InvitationId,
    /// Signature over the id with the starter signature key
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// Canonical form of a seed: lowercase alphanumerics only.
///
/// Seeds are typed by humans, so spacing, hyphens and case are ignored.
pub fn normalize_seed(seed: &str) -> String {
    seed.chars().filter(char::is_ascii_alphanumeric).map(|c| c.to_ascii_lowercase()).collect()
}

/// Id of the invitation created from `seed`.
pub fn invitation_id(seed: &str) -> Result<InvitationId, CryptoError> {
    let bytes = derive_key(INVITATION_SALT, normalize_seed(seed).as_bytes(), b"id")?;
    Ok(InvitationId(hex::encode(&bytes[..12])))
}

/// Starter keys derived from `seed`, named after the invitation id.
///
/// A new device uses these to open the lockbox holding its user's keys.
pub fn starter_keys(seed: &str) -> Result<KeysetWithSecrets, CryptoError> {
    let normalized = normalize_seed(seed);
    let id = invitation_id(seed)?;

    let signature = derive_key(INVITATION_SALT, normalized.as_bytes(), b"signature")?;
    let encryption = derive_key(INVITATION_SALT, normalized.as_bytes(), b"encryption")?;

    Ok(KeysetWithSecrets {
        name: id.0,
        signature: KeyPair::signature_from_secret(signature),
        encryption: KeyPair::encryption_from_secret(encryption),
    })
}

/// Sign the invitation id with the starter signature key.
pub fn generate_proof(seed: &str) -> Result<ProofOfInvitation, CryptoError> {
    let keys = starter_keys(seed)?;
    let id = invitation_id(seed)?;
    let signature = signature::sign(id.0.as_bytes(), &keys.signature.secret_key);
    Ok(ProofOfInvitation { id, signature })
}

/// Check a proof against the starter public key recorded for its invitation.
pub fn validate_proof(proof: &ProofOfInvitation, starter_public_key: &[u8; 32]) -> bool {
    signature::verify(proof.id.0.as_bytes(), &proof.signature, starter_public_key).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_formatting_is_ignored() {
        assert_eq!(invitation_id("Pass w0rd").unwrap(), invitation_id("passw0rd").unwrap());
        assert_eq!(normalize_seed("AB-cd 12"), "abcd12");
    }

    #[test]
    fn proof_validates_only_for_matching_seed() {
        let keys = starter_keys("passw0rd").unwrap();
        let good = generate_proof("passw0rd").unwrap();
        let typo = generate_proof("password").unwrap();

        assert!(validate_proof(&good, &keys.signature.public_key));
        assert!(!validate_proof(&typo, &keys.signature.public_key));
        assert_ne!(good.id, typo.id);
    }
}
