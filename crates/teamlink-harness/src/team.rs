//! In-memory authorization history.
//!
//! [`MemoryTeam`] is a small hash-linked history of membership actions,
//! enough to drive every path of the connection protocol: invitations with
//! proofs, device lockboxes, removals, servers and head-based sync.
//!
//! Each peer holds its own copy of the history. Copies converge through the
//! sync messages the connection exchanges; handles cloned from one copy share
//! it, so a change made through one handle is seen by all of them.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use teamlink_core::Team;
use teamlink_crypto::{
    CryptoError, Hash, InvitationId, KeyPair, Keyset, NONCE_SIZE, ProofOfInvitation, asymmetric,
    hash, invitation, symmetric,
};
use teamlink_proto::{
    Device, DeviceWithSecrets, Member, ProtocolError, UserWithSecrets, decode, encode,
};
use thiserror::Error;
use tracing::{debug, trace};

/// Failures from team operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TeamError {
    /// Key material or a box was rejected
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// History or keyring bytes did not decode
    #[error(transparent)]
    Codec(#[from] ProtocolError),

    /// No invitation with this id exists
    #[error("unknown invitation {0}")]
    UnknownInvitation(InvitationId),

    /// The invitation exists but cannot be redeemed with this proof
    #[error("invitation {0} is not valid")]
    InvalidInvitation(InvitationId),

    /// The user or device is not on the team
    #[error("{0} is not on the team")]
    NotOnTeam(String),
}

/// User keys boxed for the starter keys of a device invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockbox {
    /// Public half of the ephemeral key that sealed the box
    pub encryption_key: [u8; 32],
    /// Sealed `UserWithSecrets`
    pub cipher: Vec<u8>,
}

/// One membership action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamAction {
    /// Team creation with its founding member
    Root {
        /// Team name
        team_name: String,
        /// Founder and the founding device
        founder: Member,
    },
    /// Add an existing user directly
    AddMember {
        /// The new member and its devices
        member: Member,
    },
    /// Remove a member and all of its devices
    RemoveMember {
        /// Member to remove
        user_id: String,
    },
    /// Add a device to an existing member
    AddDevice {
        /// The device record
        device: Device,
    },
    /// Remove a device
    RemoveDevice {
        /// Device to remove
        device_id: String,
    },
    /// Invite a new user
    InviteMember {
        /// Invitation id
        id: InvitationId,
        /// Starter signature key that proofs must verify against
        public_key: [u8; 32],
    },
    /// Invite a new device for an existing user
    InviteDevice {
        /// Invitation id
        id: InvitationId,
        /// Starter signature key that proofs must verify against
        public_key: [u8; 32],
        /// User the device will belong to
        user_id: String,
        /// The user's keys, sealed for the starter keys
        lockbox: Lockbox,
    },
    /// Revoke an unused invitation
    RevokeInvitation {
        /// Invitation to revoke
        id: InvitationId,
    },
    /// Redeem a member invitation
    AdmitMember {
        /// Invitation redeemed
        id: InvitationId,
        /// The admitted member
        member: Member,
    },
    /// Redeem a device invitation
    AdmitDevice {
        /// Invitation redeemed
        id: InvitationId,
        /// The admitted device
        device: Device,
    },
    /// Add a sync server
    AddServer {
        /// Server host name
        host: String,
        /// Server public keys
        keys: Keyset,
    },
    /// Remove a sync server
    RemoveServer {
        /// Server host name
        host: String,
    },
}

/// A hash-linked entry in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Hash over `prev`, `author` and `action`
    pub hash: Hash,
    /// Heads at the time the link was written
    pub prev: Vec<Hash>,
    /// Device that wrote the link
    pub author: String,
    /// What happened
    pub action: TeamAction,
}

impl Link {
    fn new(prev: Vec<Hash>, author: &str, action: TeamAction) -> Result<Self, TeamError> {
        let hash = Self::compute_hash(&prev, author, &action)?;
        Ok(Self { hash, prev, author: author.to_owned(), action })
    }

    fn compute_hash(prev: &[Hash], author: &str, action: &TeamAction) -> Result<Hash, TeamError> {
        Ok(hash("teamlink/link", &encode(&(prev, author, action))?))
    }

    fn is_intact(&self) -> bool {
        Self::compute_hash(&self.prev, &self.author, &self.action).is_ok_and(|h| h == self.hash)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TeamKeyring {
    team_key: [u8; 32],
}

#[derive(Debug, Serialize, Deserialize)]
struct SyncMessage {
    head: Vec<Hash>,
    links: Vec<Link>,
}

/// Per-peer sync bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Head the peer last announced
    pub their_head: Vec<Hash>,
    /// Last announced head of theirs that we hold completely
    pub last_common_head: Vec<Hash>,
    /// Head we last announced
    pub sent_head: Vec<Hash>,
    /// Links the peer has or has been sent
    pub their_known: BTreeSet<Hash>,
}

#[derive(Debug, Clone)]
struct MemberRecord {
    user_name: String,
    keys: Keyset,
    removed: bool,
}

#[derive(Debug, Clone)]
struct DeviceRecord {
    device: Device,
    removed: bool,
}

#[derive(Debug, Clone)]
struct ServerRecord {
    keys: Keyset,
    removed: bool,
}

#[derive(Debug, Clone)]
enum InvitationKind {
    Member,
    Device { user_id: String, lockbox: Lockbox },
}

#[derive(Debug, Clone)]
struct InvitationRecord {
    public_key: [u8; 32],
    kind: InvitationKind,
    used: bool,
    revoked: bool,
}

/// Membership derived by replaying the history.
#[derive(Debug, Default)]
struct TeamState {
    members: BTreeMap<String, MemberRecord>,
    devices: BTreeMap<String, DeviceRecord>,
    servers: BTreeMap<String, ServerRecord>,
    invitations: BTreeMap<InvitationId, InvitationRecord>,
}

impl TeamState {
    fn replay<'a>(links: impl IntoIterator<Item = &'a Link>) -> Self {
        let mut state = Self::default();
        for link in links {
            state.apply(&link.action);
        }
        state
    }

    fn apply(&mut self, action: &TeamAction) {
        match action {
            TeamAction::Root { founder: member, .. }
            | TeamAction::AddMember { member }
            | TeamAction::AdmitMember { member, .. } => {
                if let TeamAction::AdmitMember { id, .. } = action
                    && let Some(invitation) = self.invitations.get_mut(id)
                {
                    invitation.used = true;
                }
                self.members.insert(member.user_id.clone(), MemberRecord {
                    user_name: member.user_name.clone(),
                    keys: member.keys.clone(),
                    removed: false,
                });
                for device in &member.devices {
                    self.add_device(device);
                }
            },
            TeamAction::RemoveMember { user_id } => {
                if let Some(member) = self.members.get_mut(user_id) {
                    member.removed = true;
                }
                for record in self.devices.values_mut().filter(|r| &r.device.user_id == user_id) {
                    record.removed = true;
                }
            },
            TeamAction::AddDevice { device } => self.add_device(device),
            TeamAction::AdmitDevice { id, device } => {
                if let Some(invitation) = self.invitations.get_mut(id) {
                    invitation.used = true;
                }
                self.add_device(device);
            },
            TeamAction::RemoveDevice { device_id } => {
                if let Some(record) = self.devices.get_mut(device_id) {
                    record.removed = true;
                }
            },
            TeamAction::InviteMember { id, public_key } => {
                self.invitations.insert(id.clone(), InvitationRecord {
                    public_key: *public_key,
                    kind: InvitationKind::Member,
                    used: false,
                    revoked: false,
                });
            },
            TeamAction::InviteDevice { id, public_key, user_id, lockbox } => {
                self.invitations.insert(id.clone(), InvitationRecord {
                    public_key: *public_key,
                    kind: InvitationKind::Device { user_id: user_id.clone(), lockbox: lockbox.clone() },
                    used: false,
                    revoked: false,
                });
            },
            TeamAction::RevokeInvitation { id } => {
                if let Some(invitation) = self.invitations.get_mut(id) {
                    invitation.revoked = true;
                }
            },
            TeamAction::AddServer { host, keys } => {
                self.servers.insert(host.clone(), ServerRecord { keys: keys.clone(), removed: false });
            },
            TeamAction::RemoveServer { host } => {
                if let Some(server) = self.servers.get_mut(host) {
                    server.removed = true;
                }
            },
        }
    }

    fn add_device(&mut self, device: &Device) {
        self.devices
            .insert(device.device_id.clone(), DeviceRecord { device: device.clone(), removed: false });
    }

    fn member(&self, user_id: &str) -> Option<Member> {
        let record = self.members.get(user_id)?;
        Some(Member {
            user_id: user_id.to_owned(),
            user_name: record.user_name.clone(),
            keys: record.keys.clone(),
            devices: self
                .devices
                .values()
                .filter(|d| d.device.user_id == user_id && !d.removed)
                .map(|d| d.device.clone())
                .collect(),
        })
    }

    fn server_as_member(&self, host: &str) -> Option<Member> {
        let server = self.servers.get(host)?;
        Some(Member {
            user_id: host.to_owned(),
            user_name: host.to_owned(),
            keys: server.keys.clone(),
            devices: vec![server_device(host, &server.keys)],
        })
    }

    fn redeemable(&self, proof: &ProofOfInvitation) -> Option<&InvitationRecord> {
        self.invitations
            .get(&proof.id)
            .filter(|inv| !inv.used && !inv.revoked)
            .filter(|inv| invitation::validate_proof(proof, &inv.public_key))
    }
}

fn server_device(host: &str, keys: &Keyset) -> Device {
    Device {
        user_id: host.to_owned(),
        device_id: host.to_owned(),
        device_name: host.to_owned(),
        keys: keys.clone(),
        device_info: None,
    }
}

struct Graph {
    team_name: String,
    team_key: [u8; 32],
    links: BTreeMap<Hash, Link>,
    rng: ChaCha8Rng,
}

impl Graph {
    fn from_links(team_key: [u8; 32], links: Vec<Link>, rng_domain: &str) -> Self {
        let mut seed_input = team_key.to_vec();
        seed_input.extend_from_slice(rng_domain.as_bytes());
        let links: BTreeMap<Hash, Link> =
            links.into_iter().filter(Link::is_intact).map(|l| (l.hash, l)).collect();

        let team_name = links
            .values()
            .find_map(|l| match &l.action {
                TeamAction::Root { team_name, .. } => Some(team_name.clone()),
                _ => None,
            })
            .unwrap_or_default();

        Self {
            team_name,
            team_key,
            links,
            rng: ChaCha8Rng::from_seed(hash("teamlink/team-rng", &seed_input).0),
        }
    }

    fn head(&self) -> Vec<Hash> {
        let referenced: BTreeSet<&Hash> = self.links.values().flat_map(|l| &l.prev).collect();
        self.links.keys().filter(|h| !referenced.contains(h)).copied().collect()
    }

    /// Links in a deterministic topological order. Links whose parents are
    /// missing are left out.
    fn ordered(&self) -> Vec<&Link> {
        let mut done: BTreeSet<Hash> = BTreeSet::new();
        let mut order = Vec::with_capacity(self.links.len());
        loop {
            let ready: Vec<&Link> = self
                .links
                .values()
                .filter(|l| !done.contains(&l.hash) && l.prev.iter().all(|p| done.contains(p)))
                .collect();
            if ready.is_empty() {
                return order;
            }
            for link in ready {
                done.insert(link.hash);
                order.push(link);
            }
        }
    }

    fn state(&self) -> TeamState {
        TeamState::replay(self.ordered())
    }

    fn append(&mut self, author: &str, action: TeamAction) -> Result<Hash, TeamError> {
        let link = Link::new(self.head(), author, action)?;
        let hash = link.hash;
        trace!(%hash, author, "appending link");
        self.links.insert(hash, link);
        Ok(hash)
    }

    /// Add foreign links; returns whether anything new arrived.
    fn merge(&mut self, links: Vec<Link>) -> bool {
        let mut changed = false;
        for link in links {
            if !link.is_intact() {
                debug!(hash = %link.hash, "dropping tampered link");
                continue;
            }
            if !self.links.contains_key(&link.hash) {
                self.links.insert(link.hash, link);
                changed = true;
            }
        }
        changed
    }

    fn random<const N: usize>(&mut self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.rng.fill_bytes(&mut bytes);
        bytes
    }
}

fn open(serialized_graph: &[u8], team_keyring: &[u8]) -> Result<([u8; 32], Vec<Link>), TeamError> {
    let keyring: TeamKeyring = decode(team_keyring)?;
    let plaintext = symmetric::decrypt(serialized_graph, &keyring.team_key)?;
    Ok((keyring.team_key, decode(&plaintext)?))
}

/// Handle to one copy of a team history.
#[derive(Clone)]
pub struct MemoryTeam {
    graph: Arc<Mutex<Graph>>,
    author: String,
}

impl fmt::Debug for MemoryTeam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.lock();
        f.debug_struct("MemoryTeam")
            .field("team", &graph.team_name)
            .field("author", &self.author)
            .field("links", &graph.links.len())
            .finish()
    }
}

impl MemoryTeam {
    /// Found a team with `user` as its first member on `device`.
    pub fn create(
        team_name: &str,
        user: &UserWithSecrets,
        device: &DeviceWithSecrets,
        seed: u64,
    ) -> Result<Self, TeamError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut team_key = [0u8; 32];
        rng.fill_bytes(&mut team_key);

        let mut graph = Graph::from_links(team_key, Vec::new(), &device.device_id);
        graph.team_name = team_name.to_owned();
        graph.append(&device.device_id, TeamAction::Root {
            team_name: team_name.to_owned(),
            founder: Member {
                user_id: user.user_id.clone(),
                user_name: user.user_name.clone(),
                keys: user.keys.redact(),
                devices: vec![device.redact()],
            },
        })?;

        Ok(Self { graph: Arc::new(Mutex::new(graph)), author: device.device_id.clone() })
    }

    /// Independent copy of this history, as held by another device.
    pub fn fork(&self, device_id: &str) -> Self {
        let graph = self.lock();
        let links = graph.links.values().cloned().collect();
        let mut copy = Graph::from_links(graph.team_key, links, device_id);
        copy.team_name.clone_from(&graph.team_name);
        Self { graph: Arc::new(Mutex::new(copy)), author: device_id.to_owned() }
    }

    /// Team name.
    pub fn name(&self) -> String {
        self.lock().team_name.clone()
    }

    /// Add a user directly, with its devices.
    pub fn add_member(&self, user: &UserWithSecrets, devices: &[Device]) -> Result<(), TeamError> {
        self.append(TeamAction::AddMember {
            member: Member {
                user_id: user.user_id.clone(),
                user_name: user.user_name.clone(),
                keys: user.keys.redact(),
                devices: devices.to_vec(),
            },
        })
    }

    /// Add a device to an existing member.
    pub fn add_device(&self, device: Device) -> Result<(), TeamError> {
        if !self.lock().state().members.contains_key(&device.user_id) {
            return Err(TeamError::NotOnTeam(device.user_id));
        }
        self.append(TeamAction::AddDevice { device })
    }

    /// Remove a member and its devices.
    pub fn remove_member(&self, user_id: &str) -> Result<(), TeamError> {
        self.append(TeamAction::RemoveMember { user_id: user_id.to_owned() })
    }

    /// Remove a device.
    pub fn remove_device(&self, device_id: &str) -> Result<(), TeamError> {
        self.append(TeamAction::RemoveDevice { device_id: device_id.to_owned() })
    }

    /// Invite a new user with `seed`.
    pub fn invite_member(&self, seed: &str) -> Result<InvitationId, TeamError> {
        let id = invitation::invitation_id(seed)?;
        let starter = invitation::starter_keys(seed)?;
        self.append(TeamAction::InviteMember { id: id.clone(), public_key: starter.signature.public_key })?;
        Ok(id)
    }

    /// Invite a new device for `user` with `seed`, sealing the user's keys
    /// for the device to recover on join.
    pub fn invite_device(&self, user: &UserWithSecrets, seed: &str) -> Result<InvitationId, TeamError> {
        let id = invitation::invitation_id(seed)?;
        let starter = invitation::starter_keys(seed)?;

        let lockbox = {
            let mut graph = self.lock();
            let ephemeral = KeyPair::encryption_from_secret(graph.random());
            let nonce: [u8; NONCE_SIZE] = graph.random();
            Lockbox {
                encryption_key: ephemeral.public_key,
                cipher: asymmetric::encrypt(
                    &encode(user)?,
                    &starter.encryption.public_key,
                    &ephemeral.secret_key,
                    nonce,
                )?,
            }
        };

        self.append(TeamAction::InviteDevice {
            id: id.clone(),
            public_key: starter.signature.public_key,
            user_id: user.user_id.clone(),
            lockbox,
        })?;
        Ok(id)
    }

    /// Revoke an invitation.
    pub fn revoke_invitation(&self, id: &InvitationId) -> Result<(), TeamError> {
        self.append(TeamAction::RevokeInvitation { id: id.clone() })
    }

    /// Add a sync server.
    pub fn add_server(&self, host: &str, keys: Keyset) -> Result<(), TeamError> {
        self.append(TeamAction::AddServer { host: host.to_owned(), keys })
    }

    /// Remove a sync server.
    pub fn remove_server(&self, host: &str) -> Result<(), TeamError> {
        self.append(TeamAction::RemoveServer { host: host.to_owned() })
    }

    /// Whether `user_id` is a current member.
    pub fn has_member(&self, user_id: &str) -> bool {
        self.lock().state().members.get(user_id).is_some_and(|m| !m.removed)
    }

    /// Current members.
    pub fn members(&self) -> Vec<Member> {
        let state = self.lock().state();
        state
            .members
            .iter()
            .filter(|(_, record)| !record.removed)
            .filter_map(|(user_id, _)| state.member(user_id))
            .collect()
    }

    /// Number of links in this copy.
    pub fn link_count(&self) -> usize {
        self.lock().links.len()
    }

    /// Whether two handles share one copy.
    pub fn same_copy(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph)
    }

    fn append(&self, action: TeamAction) -> Result<(), TeamError> {
        self.lock().append(&self.author, action).map(|_| ())
    }

    fn lock(&self) -> MutexGuard<'_, Graph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Team for MemoryTeam {
    type SyncState = SyncState;
    type Error = TeamError;

    fn validate_invitation(&self, proof: &ProofOfInvitation) -> bool {
        self.lock().state().redeemable(proof).is_some()
    }

    fn admit_member(
        &self,
        proof: &ProofOfInvitation,
        user_keys: &Keyset,
        user_name: &str,
    ) -> Result<Member, TeamError> {
        let mut graph = self.lock();
        let state = graph.state();
        match state.redeemable(proof).map(|inv| &inv.kind) {
            Some(InvitationKind::Member) => {},
            Some(InvitationKind::Device { .. }) | None => {
                return Err(TeamError::InvalidInvitation(proof.id.clone()));
            },
        }

        let member = Member {
            user_id: user_keys.name.clone(),
            user_name: user_name.to_owned(),
            keys: user_keys.clone(),
            devices: Vec::new(),
        };
        graph.append(&self.author, TeamAction::AdmitMember { id: proof.id.clone(), member: member.clone() })?;
        Ok(member)
    }

    fn admit_device(&self, proof: &ProofOfInvitation, device: &Device) -> Result<Member, TeamError> {
        let mut graph = self.lock();
        let state = graph.state();
        let user_id = match state.redeemable(proof).map(|inv| &inv.kind) {
            Some(InvitationKind::Device { user_id, .. }) => user_id.clone(),
            Some(InvitationKind::Member) | None => {
                return Err(TeamError::InvalidInvitation(proof.id.clone()));
            },
        };

        let device = Device { user_id: user_id.clone(), ..device.clone() };
        graph.append(&self.author, TeamAction::AdmitDevice { id: proof.id.clone(), device })?;
        graph.state().member(&user_id).ok_or(TeamError::NotOnTeam(user_id))
    }

    fn save(&self) -> Result<Vec<u8>, TeamError> {
        let mut graph = self.lock();
        let links: Vec<Link> = graph.ordered().into_iter().cloned().collect();
        let nonce: [u8; NONCE_SIZE] = graph.random();
        Ok(symmetric::encrypt(&encode(&links)?, &graph.team_key, nonce)?)
    }

    fn team_keyring(&self) -> Result<Vec<u8>, TeamError> {
        Ok(encode(&TeamKeyring { team_key: self.lock().team_key })?)
    }

    fn contains_invitation(serialized_graph: &[u8], team_keyring: &[u8], id: &InvitationId) -> bool {
        open(serialized_graph, team_keyring)
            .map(|(key, links)| Graph::from_links(key, links, "check").state().invitations.contains_key(id))
            .unwrap_or(false)
    }

    fn join(
        serialized_graph: &[u8],
        team_keyring: &[u8],
        invitation_seed: &str,
        user: Option<&UserWithSecrets>,
        device: &DeviceWithSecrets,
    ) -> Result<(Self, UserWithSecrets), TeamError> {
        let (team_key, links) = open(serialized_graph, team_keyring)?;
        let mut graph = Graph::from_links(team_key, links, &device.device_id);
        let state = graph.state();

        let user = match user {
            Some(user) => user.clone(),
            None => {
                let id = invitation::invitation_id(invitation_seed)?;
                let Some(InvitationRecord { kind: InvitationKind::Device { lockbox, .. }, .. }) =
                    state.invitations.get(&id)
                else {
                    return Err(TeamError::UnknownInvitation(id));
                };
                let starter = invitation::starter_keys(invitation_seed)?;
                let plaintext = asymmetric::decrypt(
                    &lockbox.cipher,
                    &lockbox.encryption_key,
                    &starter.encryption.secret_key,
                )?;
                decode(&plaintext)?
            },
        };

        if !state.devices.contains_key(&device.device_id) {
            graph.append(&device.device_id, TeamAction::AddDevice { device: device.redact() })?;
        }

        let team = Self { graph: Arc::new(Mutex::new(graph)), author: device.device_id.clone() };
        Ok((team, user))
    }

    fn has_device(&self, device_id: &str, include_removed: bool) -> bool {
        let state = self.lock().state();
        let device = state.devices.get(device_id).map(|d| d.removed);
        let server = state.servers.get(device_id).map(|s| s.removed);
        device.or(server).is_some_and(|removed| include_removed || !removed)
    }

    fn device(&self, device_id: &str) -> Option<Device> {
        let state = self.lock().state();
        state
            .devices
            .get(device_id)
            .map(|d| d.device.clone())
            .or_else(|| state.servers.get(device_id).map(|s| server_device(device_id, &s.keys)))
    }

    fn member_by_device_id(&self, device_id: &str) -> Option<Member> {
        let state = self.lock().state();
        match state.devices.get(device_id) {
            Some(record) => state.member(&record.device.user_id),
            None => state.server_as_member(device_id),
        }
    }

    fn member_was_removed(&self, user_id: &str) -> bool {
        self.lock().state().members.get(user_id).is_some_and(|m| m.removed)
    }

    fn device_was_removed(&self, device_id: &str) -> bool {
        self.lock().state().devices.get(device_id).is_some_and(|d| d.removed)
    }

    fn server_was_removed(&self, host: &str) -> bool {
        self.lock().state().servers.get(host).is_some_and(|s| s.removed)
    }

    fn head(&self) -> Vec<Hash> {
        self.lock().head()
    }

    fn generate_sync_message(&self, state: &SyncState) -> Result<(SyncState, Option<Vec<u8>>), TeamError> {
        let graph = self.lock();
        let head = graph.head();
        if head == state.their_head && head == state.sent_head {
            return Ok((state.clone(), None));
        }

        let links: Vec<Link> = graph
            .ordered()
            .into_iter()
            .filter(|l| !state.their_known.contains(&l.hash))
            .cloned()
            .collect();

        let mut next = state.clone();
        next.sent_head.clone_from(&head);
        next.their_known.extend(links.iter().map(|l| l.hash));
        let message = encode(&SyncMessage { head, links })?;
        Ok((next, Some(message)))
    }

    fn receive_sync_message(
        &self,
        state: &SyncState,
        message: &[u8],
        _device: &DeviceWithSecrets,
    ) -> Result<(SyncState, bool), TeamError> {
        let SyncMessage { head, links } = decode(message)?;
        let mut graph = self.lock();

        let mut next = state.clone();
        next.their_known.extend(links.iter().map(|l| l.hash));
        next.their_known.extend(head.iter().copied());
        let changed = graph.merge(links);

        if head.iter().all(|h| graph.links.contains_key(h)) {
            next.last_common_head.clone_from(&head);
        }
        next.their_head = head;
        Ok((next, changed))
    }

    fn heads_equal(&self, state: &SyncState) -> bool {
        self.lock().head() == state.last_common_head
    }
}
