//! Identity records and claims.

use serde::{Deserialize, Serialize};
use teamlink_crypto::{Keyset, KeysetWithSecrets, ProofOfInvitation};

/// Public record of a device, as stored on the team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Owning user
    pub user_id: String,
    /// Unique device id
    pub device_id: String,
    /// Human-readable device name
    pub device_name: String,
    /// Public keys
    pub keys: Keyset,
    /// Free-form metadata (user agent, platform)
    pub device_info: Option<String>,
}

/// A local device with its secret keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceWithSecrets {
    /// Owning user
    pub user_id: String,
    /// Unique device id
    pub device_id: String,
    /// Human-readable device name
    pub device_name: String,
    /// Signature and encryption keypairs
    pub keys: KeysetWithSecrets,
    /// Free-form metadata (user agent, platform)
    pub device_info: Option<String>,
}

impl DeviceWithSecrets {
    /// Public form for claims and team records.
    pub fn redact(&self) -> Device {
        Device {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            keys: self.keys.redact(),
            device_info: self.device_info.clone(),
        }
    }
}

/// A local user with secret user keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserWithSecrets {
    /// Unique user id
    pub user_id: String,
    /// Display name
    pub user_name: String,
    /// User keys (shared by all of the user's devices)
    pub keys: KeysetWithSecrets,
}

/// A sync server. Its keys act as both user keys and device keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerWithSecrets {
    /// Host name, doubling as user id and device id
    pub host: String,
    /// Server keys
    pub keys: KeysetWithSecrets,
}

impl ServerWithSecrets {
    /// The server seen as a user.
    pub fn as_user(&self) -> UserWithSecrets {
        UserWithSecrets {
            user_id: self.host.clone(),
            user_name: self.host.clone(),
            keys: self.keys.clone(),
        }
    }

    /// The server seen as a device of itself.
    pub fn as_device(&self) -> DeviceWithSecrets {
        DeviceWithSecrets {
            user_id: self.host.clone(),
            device_id: self.host.clone(),
            device_name: self.host.clone(),
            keys: self.keys.clone(),
            device_info: None,
        }
    }
}

/// Public record of a team member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Unique user id
    pub user_id: String,
    /// Display name
    pub user_name: String,
    /// Public user keys
    pub keys: Keyset,
    /// Devices currently on the team
    pub devices: Vec<Device>,
}

/// First message asserting who a peer is or what it is entitled to become.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityClaim {
    /// Existing member; identity is proven afterwards by signature challenge
    Member {
        /// Device the peer claims to be
        device_id: String,
    },

    /// New user holding an invitation
    InviteeMember {
        /// Proof of knowing the invitation seed
        proof_of_invitation: ProofOfInvitation,
        /// Name the new user will have on the team
        user_name: String,
        /// Public user keys to record
        user_keys: Keyset,
        /// Public device record to record
        device: Device,
    },

    /// New device for an existing user holding a device invitation
    InviteeDevice {
        /// Proof of knowing the invitation seed
        proof_of_invitation: ProofOfInvitation,
        /// Name of the existing user
        user_name: String,
        /// Public device record to record
        device: Device,
    },
}

impl IdentityClaim {
    /// Invitation proof, present exactly when the claim is an invitee's.
    pub fn proof_of_invitation(&self) -> Option<&ProofOfInvitation> {
        match self {
            Self::Member { .. } => None,
            Self::InviteeMember { proof_of_invitation, .. }
            | Self::InviteeDevice { proof_of_invitation, .. } => Some(proof_of_invitation),
        }
    }

    /// Device carried in the claim. Members only send a device id.
    pub fn device(&self) -> Option<&Device> {
        match self {
            Self::Member { .. } => None,
            Self::InviteeMember { device, .. } | Self::InviteeDevice { device, .. } => Some(device),
        }
    }
}

/// Signature challenge issued to a member claiming `device_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Device whose signature key must answer
    pub device_id: String,
    /// Fresh random bytes
    pub nonce: [u8; 32],
}
