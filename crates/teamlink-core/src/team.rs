//! Authorization-history collaborator.
//!
//! The connection never owns team logic. It asks a [`Team`] handle for
//! membership facts, admits invitees through it, and exchanges opaque sync
//! messages produced by it. Handles are cheap clones sharing one underlying
//! history, so a change made through any handle is visible to every
//! connection holding one.

use std::fmt;

use teamlink_crypto::{Hash, InvitationId, Keyset, ProofOfInvitation};
use teamlink_proto::{Device, DeviceWithSecrets, Member, UserWithSecrets};

/// Shared, mutable authorization history.
pub trait Team: Clone {
    /// Per-peer sync bookkeeping, owned by the connection.
    type SyncState: Clone + Default + fmt::Debug;

    /// Failure from a team operation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether `proof` answers a pending, unrevoked invitation.
    fn validate_invitation(&self, proof: &ProofOfInvitation) -> bool;

    /// Record a new member holding the invitation proven by `proof`.
    fn admit_member(
        &self,
        proof: &ProofOfInvitation,
        user_keys: &Keyset,
        user_name: &str,
    ) -> Result<Member, Self::Error>;

    /// Record a new device for the user named in the device invitation.
    fn admit_device(&self, proof: &ProofOfInvitation, device: &Device) -> Result<Member, Self::Error>;

    /// Serialized history, as sent in `ACCEPT_INVITATION`.
    fn save(&self) -> Result<Vec<u8>, Self::Error>;

    /// Serialized team keyring needed to read [`Team::save`] output.
    fn team_keyring(&self) -> Result<Vec<u8>, Self::Error>;

    /// Whether a serialized history contains an invitation with `id`.
    fn contains_invitation(serialized_graph: &[u8], team_keyring: &[u8], id: &InvitationId) -> bool;

    /// Instantiate a team from a serialized history and join it.
    ///
    /// Device invitees pass `user: None`; the user keys are recovered with
    /// the invitation seed.
    fn join(
        serialized_graph: &[u8],
        team_keyring: &[u8],
        invitation_seed: &str,
        user: Option<&UserWithSecrets>,
        device: &DeviceWithSecrets,
    ) -> Result<(Self, UserWithSecrets), Self::Error>;

    /// Whether the team knows `device_id`, optionally counting removed devices.
    fn has_device(&self, device_id: &str, include_removed: bool) -> bool;

    /// Device record, including removed devices.
    fn device(&self, device_id: &str) -> Option<Device>;

    /// Member owning `device_id`, including removed members.
    fn member_by_device_id(&self, device_id: &str) -> Option<Member>;

    /// Whether the user was a member and has been removed.
    fn member_was_removed(&self, user_id: &str) -> bool;

    /// Whether the device was on the team and has been removed.
    fn device_was_removed(&self, device_id: &str) -> bool;

    /// Whether the server was on the team and has been removed.
    fn server_was_removed(&self, host: &str) -> bool;

    /// Current head(s) of the history.
    fn head(&self) -> Vec<Hash>;

    /// Next sync message for the peer, if any.
    fn generate_sync_message(
        &self,
        state: &Self::SyncState,
    ) -> Result<(Self::SyncState, Option<Vec<u8>>), Self::Error>;

    /// Merge a sync message from the peer. Returns the new state and whether
    /// the local history changed.
    fn receive_sync_message(
        &self,
        state: &Self::SyncState,
        message: &[u8],
        device: &DeviceWithSecrets,
    ) -> Result<(Self::SyncState, bool), Self::Error>;

    /// Whether the local head equals the last head known to be common.
    fn heads_equal(&self, state: &Self::SyncState) -> bool;
}
