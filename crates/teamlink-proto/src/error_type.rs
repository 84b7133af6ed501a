//! Protocol error taxonomy.
//!
//! Every variant is fatal: the connection that detects it sends an `ERROR`
//! message carrying an [`ErrorPayload`] and disconnects. The peer surfaces it
//! as a remote error and disconnects without replying.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionErrorType {
    /// Both peers presented invitations; someone has to be a member already
    #[error("We can't connect because neither of us is a member of the team.")]
    NeitherIsMember,

    /// The team that accepted our invitation does not contain it
    #[error("The team I joined is not the one that invited me.")]
    JoinedWrongTeam,

    /// The peer's invitation proof does not match any pending invitation
    #[error("The invitation proof is not valid.")]
    InvitationProofInvalid,

    /// The peer claimed a device the team has never seen
    #[error("The device claimed is not known to the team.")]
    DeviceUnknown,

    /// The peer's signature over our challenge did not verify
    #[error("The identity proof is not valid.")]
    IdentityProofInvalid,

    /// A box could not be opened with the keys we expect the peer to hold
    #[error("The message could not be decrypted with the expected keys.")]
    EncryptionFailure,

    /// The peer's user was removed from the team
    #[error("The member has been removed from the team.")]
    MemberRemoved,

    /// The peer's device was removed from the team
    #[error("The device has been removed from the team.")]
    DeviceRemoved,

    /// The peer's server was removed from the team
    #[error("The server has been removed from the team.")]
    ServerRemoved,

    /// The peer did not answer in time
    #[error("The peer did not respond in time.")]
    Timeout,

    /// An internal fault in the protocol machine
    #[error("An unhandled error occurred.")]
    Unhandled,
}

impl ConnectionErrorType {
    /// Wire code of this error, e.g. `IDENTITY_PROOF_INVALID`.
    pub fn code(self) -> &'static str {
        match self {
            Self::NeitherIsMember => "NEITHER_IS_MEMBER",
            Self::JoinedWrongTeam => "JOINED_WRONG_TEAM",
            Self::InvitationProofInvalid => "INVITATION_PROOF_INVALID",
            Self::DeviceUnknown => "DEVICE_UNKNOWN",
            Self::IdentityProofInvalid => "IDENTITY_PROOF_INVALID",
            Self::EncryptionFailure => "ENCRYPTION_FAILURE",
            Self::MemberRemoved => "MEMBER_REMOVED",
            Self::DeviceRemoved => "DEVICE_REMOVED",
            Self::ServerRemoved => "SERVER_REMOVED",
            Self::Timeout => "TIMEOUT",
            Self::Unhandled => "UNHANDLED",
        }
    }
}

/// Error as carried in an `ERROR` message and in error events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable reason
    pub error_type: ConnectionErrorType,
    /// Human-readable description
    pub message: String,
}

impl From<ConnectionErrorType> for ErrorPayload {
    fn from(error_type: ConnectionErrorType) -> Self {
        Self { error_type, message: error_type.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_display_text() {
        let payload = ErrorPayload::from(ConnectionErrorType::Timeout);
        insta::assert_snapshot!(payload.message, @"The peer did not respond in time.");
        assert_eq!(payload.error_type.code(), "TIMEOUT");
    }

    #[test]
    fn wire_name_matches_code() {
        let bytes = crate::encode(&ConnectionErrorType::JoinedWrongTeam).unwrap();
        let name: String = crate::decode(&bytes).unwrap();
        assert_eq!(name, ConnectionErrorType::JoinedWrongTeam.code());
    }
}
