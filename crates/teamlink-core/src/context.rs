//! Connection context and identity predicates.
//!
//! [`Context`] is what the application hands to a new connection: who we are
//! and either the team we belong to or the invitation we hold. It is expanded
//! into a [`ConnectionContext`], which the state machine fills in as the
//! handshake progresses.

use teamlink_crypto::{SessionKey, invitation};
use teamlink_proto::{
    Challenge, Device, DeviceWithSecrets, ErrorPayload, IdentityClaim, Member, ServerWithSecrets,
    UserWithSecrets,
};

use crate::{error::Fault, team::Team};

/// Initial context supplied by the application.
#[derive(Debug, Clone)]
pub enum Context<T> {
    /// Existing member connecting with one of its devices
    Member {
        /// Our user
        user: UserWithSecrets,
        /// Our device
        device: DeviceWithSecrets,
        /// The team we belong to
        team: T,
    },

    /// Sync server on the team
    Server {
        /// Our server identity
        server: ServerWithSecrets,
        /// The team we serve
        team: T,
    },

    /// New user holding an invitation
    InviteeMember {
        /// The user we will become on the team
        user: UserWithSecrets,
        /// Our device
        device: DeviceWithSecrets,
        /// Secret invitation seed
        invitation_seed: String,
    },

    /// New device for an existing user holding a device invitation
    InviteeDevice {
        /// Name of the existing user
        user_name: String,
        /// Our new device
        device: DeviceWithSecrets,
        /// Secret invitation seed
        invitation_seed: String,
    },
}

/// What we are from the protocol's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Member, or a server acting as one
    Member,
    /// Invited new user
    InviteeMember {
        /// Secret invitation seed
        invitation_seed: String,
    },
    /// Invited new device
    InviteeDevice {
        /// Secret invitation seed
        invitation_seed: String,
        /// Name of the existing user
        user_name: String,
    },
}

impl Role {
    /// Whether we hold an invitation rather than membership.
    pub fn is_invitee(&self) -> bool {
        !matches!(self, Self::Member)
    }

    /// Our invitation seed, for invitees.
    pub fn invitation_seed(&self) -> Option<&str> {
        match self {
            Self::Member => None,
            Self::InviteeMember { invitation_seed }
            | Self::InviteeDevice { invitation_seed, .. } => Some(invitation_seed),
        }
    }
}

/// Mutable per-connection state.
#[derive(Clone)]
pub struct ConnectionContext<T: Team> {
    /// Our role
    pub role: Role,
    /// Our device, with secrets
    pub device: DeviceWithSecrets,
    /// Our user. Absent for a device invitee until it joins.
    pub user: Option<UserWithSecrets>,
    /// Our team. Absent for invitees until they join.
    pub team: Option<T>,
    /// The claim we sent
    pub our_identity_claim: Option<IdentityClaim>,
    /// The claim the peer sent
    pub their_identity_claim: Option<IdentityClaim>,
    /// Public record of the peer's device
    pub their_device: Option<Device>,
    /// The peer's member record
    pub peer: Option<Member>,
    /// Challenge we issued to the peer
    pub challenge: Option<Challenge>,
    /// Our seed contribution to the session key
    pub seed: Option<[u8; 32]>,
    /// Negotiated session key
    pub session_key: Option<SessionKey>,
    /// Sync bookkeeping for this peer
    pub sync_state: T::SyncState,
    /// Error that ended the connection, if any
    pub error: Option<ErrorPayload>,
}

impl<T: Team> From<Context<T>> for ConnectionContext<T> {
    fn from(context: Context<T>) -> Self {
        let (role, device, user, team) = match context {
            Context::Member { user, device, team } => (Role::Member, device, Some(user), Some(team)),
            // A server takes part exactly like a member whose user and device are itself
            Context::Server { server, team } => {
                (Role::Member, server.as_device(), Some(server.as_user()), Some(team))
            },
            Context::InviteeMember { user, device, invitation_seed } => {
                (Role::InviteeMember { invitation_seed }, device, Some(user), None)
            },
            Context::InviteeDevice { user_name, device, invitation_seed } => {
                (Role::InviteeDevice { invitation_seed, user_name }, device, None, None)
            },
        };

        Self {
            role,
            device,
            user,
            team,
            our_identity_claim: None,
            their_identity_claim: None,
            their_device: None,
            peer: None,
            challenge: None,
            seed: None,
            session_key: None,
            sync_state: T::SyncState::default(),
            error: None,
        }
    }
}

impl<T: Team> ConnectionContext<T> {
    /// Build the claim we send in `CLAIM_IDENTITY`.
    pub(crate) fn create_identity_claim(&self) -> Result<IdentityClaim, Fault> {
        Ok(match &self.role {
            Role::Member => IdentityClaim::Member { device_id: self.device.device_id.clone() },
            Role::InviteeMember { invitation_seed } => {
                let (user_name, user_keys) = match &self.user {
                    Some(user) => (user.user_name.clone(), user.keys.redact()),
                    None => return Err(Fault::MissingContext("user")),
                };
                IdentityClaim::InviteeMember {
                    proof_of_invitation: invitation::generate_proof(invitation_seed)?,
                    user_name,
                    user_keys,
                    device: self.device.redact(),
                }
            },
            Role::InviteeDevice { invitation_seed, user_name } => IdentityClaim::InviteeDevice {
                proof_of_invitation: invitation::generate_proof(invitation_seed)?,
                user_name: user_name.clone(),
                device: self.device.redact(),
            },
        })
    }

    /// Whether both claims have been exchanged.
    pub fn both_sent_identity_claim(&self) -> bool {
        self.our_identity_claim.is_some() && self.their_identity_claim.is_some()
    }

    /// Whether we joined by invitation on this connection.
    pub fn we_have_invitation(&self) -> bool {
        self.our_identity_claim.as_ref().is_some_and(is_invitee_claim)
    }

    /// Whether the peer is joining by invitation.
    pub fn they_have_invitation(&self) -> bool {
        self.their_identity_claim.as_ref().is_some_and(is_invitee_claim)
    }

    /// Both sides presented invitations, so nobody can admit anybody.
    pub fn neither_is_member(&self) -> bool {
        self.we_have_invitation() && self.they_have_invitation()
    }

    /// Our display name, for logs.
    pub fn user_name(&self) -> &str {
        match (&self.user, &self.role) {
            (Some(user), _) => &user.user_name,
            (None, Role::InviteeDevice { user_name, .. }) => user_name,
            (None, _) => &self.device.device_name,
        }
    }
}

/// Whether `claim` is an invitee's claim.
pub fn is_invitee_claim(claim: &IdentityClaim) -> bool {
    claim.proof_of_invitation().is_some()
}

/// Whether `claim` is an invitee-member's claim.
pub fn is_invitee_member_claim(claim: &IdentityClaim) -> bool {
    matches!(claim, IdentityClaim::InviteeMember { .. })
}

#[cfg(test)]
mod tests {
    use teamlink_crypto::{InvitationId, KeysetWithSecrets, ProofOfInvitation};

    use super::*;

    fn device() -> DeviceWithSecrets {
        DeviceWithSecrets {
            user_id: "bob".into(),
            device_id: "bob-laptop".into(),
            device_name: "laptop".into(),
            keys: KeysetWithSecrets::from_secret_bytes("bob-laptop", &[9u8; 64]),
            device_info: None,
        }
    }

    fn invitee_claim() -> IdentityClaim {
        IdentityClaim::InviteeDevice {
            proof_of_invitation: ProofOfInvitation { id: InvitationId("id".into()), signature: vec![] },
            user_name: "bob".into(),
            device: device().redact(),
        }
    }

    #[test]
    fn claim_kinds() {
        let member = IdentityClaim::Member { device_id: "alice-laptop".into() };
        assert!(!is_invitee_claim(&member));
        assert!(!is_invitee_member_claim(&member));

        let invitee = invitee_claim();
        assert!(is_invitee_claim(&invitee));
        assert!(!is_invitee_member_claim(&invitee));
    }

    #[test]
    fn role_exposes_seed_for_invitees_only() {
        assert!(!Role::Member.is_invitee());
        assert_eq!(Role::Member.invitation_seed(), None);

        let role = Role::InviteeDevice { invitation_seed: "seed".into(), user_name: "bob".into() };
        assert!(role.is_invitee());
        assert_eq!(role.invitation_seed(), Some("seed"));
    }
}
