//! Connection messages.
//!
//! # Protocol Flow
//!
//! ```text
//! REQUEST_IDENTITY  ──►        ◄──  REQUEST_IDENTITY
//! CLAIM_IDENTITY    ──►        ◄──  CLAIM_IDENTITY
//!            (invitee only)    ◄──  ACCEPT_INVITATION
//! CHALLENGE_IDENTITY ─►        ◄──  PROVE_IDENTITY
//!                              ◄──  ACCEPT_IDENTITY
//! SEED              ──►        ◄──  SEED
//! SYNC …            ──►        ◄──  SYNC …
//! ENCRYPTED_MESSAGE ◄──────────────► ENCRYPTED_MESSAGE
//! ```
//!
//! `ERROR`, `DISCONNECT` and `REQUEST_RESEND` may appear at any point.

use serde::{Deserialize, Serialize};

use crate::{Challenge, ErrorPayload, IdentityClaim, codec, errors::Result};

/// A message exchanged between two connection peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionMessage {
    /// Ask the peer to send its identity claim
    RequestIdentity,

    /// Our identity claim
    ClaimIdentity(IdentityClaim),

    /// Ask the peer to sign a challenge with its device key
    ChallengeIdentity {
        /// The challenge to sign
        challenge: Challenge,
    },

    /// Signed response to a challenge
    ProveIdentity {
        /// The challenge that was signed
        challenge: Challenge,
        /// Ed25519 signature over the encoded challenge
        #[serde(with = "serde_bytes")]
        proof: Vec<u8>,
    },

    /// The peer's identity proof verified
    AcceptIdentity,

    /// The peer's invitation was accepted; carries the team so it can join
    AcceptInvitation {
        /// Serialized (encrypted) authorization history
        #[serde(with = "serde_bytes")]
        serialized_graph: Vec<u8>,
        /// Serialized team keyring needed to read it
        #[serde(with = "serde_bytes")]
        team_keyring: Vec<u8>,
    },

    /// Our session seed, boxed for the peer's encryption key
    Seed {
        /// Asymmetric box of the seed
        #[serde(with = "serde_bytes")]
        encrypted_seed: Vec<u8>,
    },

    /// Opaque authorization-history sync message
    Sync {
        /// Produced by the team's sync algorithm
        #[serde(with = "serde_bytes")]
        sync_message: Vec<u8>,
    },

    /// Application payload encrypted with the session key
    EncryptedMessage {
        /// Symmetric box of the payload
        #[serde(with = "serde_bytes")]
        cipher: Vec<u8>,
    },

    /// The sender hit a fatal error and is disconnecting
    Error(ErrorPayload),

    /// The sender is disconnecting cleanly
    Disconnect,

    /// Resend every message from `index` onwards
    RequestResend {
        /// Lowest index the sender is missing
        index: u64,
    },
}

impl ConnectionMessage {
    /// Wire name of the message type, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestIdentity => "REQUEST_IDENTITY",
            Self::ClaimIdentity(_) => "CLAIM_IDENTITY",
            Self::ChallengeIdentity { .. } => "CHALLENGE_IDENTITY",
            Self::ProveIdentity { .. } => "PROVE_IDENTITY",
            Self::AcceptIdentity => "ACCEPT_IDENTITY",
            Self::AcceptInvitation { .. } => "ACCEPT_INVITATION",
            Self::Seed { .. } => "SEED",
            Self::Sync { .. } => "SYNC",
            Self::EncryptedMessage { .. } => "ENCRYPTED_MESSAGE",
            Self::Error(_) => "ERROR",
            Self::Disconnect => "DISCONNECT",
            Self::RequestResend { .. } => "REQUEST_RESEND",
        }
    }
}

/// A message tagged with its per-direction sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberedMessage<M> {
    /// Position in the sender's outgoing stream, starting at 0
    pub index: u64,
    /// The message itself
    pub message: M,
}

impl NumberedMessage<ConnectionMessage> {
    /// Encode for the transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    /// Decode bytes received from the transport.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use teamlink_crypto::{InvitationId, KeysetWithSecrets, ProofOfInvitation};

    use super::*;
    use crate::{ConnectionErrorType, DeviceWithSecrets, ProtocolError};

    fn device() -> DeviceWithSecrets {
        DeviceWithSecrets {
            user_id: "bob".into(),
            device_id: "bob-laptop".into(),
            device_name: "laptop".into(),
            keys: KeysetWithSecrets::from_secret_bytes("bob-laptop", &[3u8; 64]),
            device_info: Some("test agent".into()),
        }
    }

    #[test]
    fn claim_survives_the_wire() {
        let claim = IdentityClaim::InviteeDevice {
            proof_of_invitation: ProofOfInvitation {
                id: InvitationId("abc".into()),
                signature: vec![1, 2, 3],
            },
            user_name: "bob".into(),
            device: device().redact(),
        };
        let numbered = NumberedMessage { index: 3, message: ConnectionMessage::ClaimIdentity(claim) };

        let decoded = NumberedMessage::from_bytes(&numbered.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, numbered);
    }

    #[test]
    fn unit_and_error_variants_decode() {
        for message in [
            ConnectionMessage::Disconnect,
            ConnectionMessage::Error(ConnectionErrorType::DeviceUnknown.into()),
            ConnectionMessage::RequestResend { index: 12 },
        ] {
            let numbered = NumberedMessage { index: 0, message };
            let decoded = NumberedMessage::from_bytes(&numbered.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded.message.kind(), numbered.message.kind());
        }
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let result = NumberedMessage::from_bytes(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
