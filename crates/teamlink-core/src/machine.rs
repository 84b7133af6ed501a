//! Connection state machine.
//!
//! # States
//!
//! ```text
//! AwaitingIdentityClaim
//!        │ both claims exchanged
//!        ▼
//! Authenticating ── CheckingInvitations
//!        │            ├─ we are invited ──► AwaitingInvitationAcceptance ─┐
//!        │            ├─ they are invited ► ValidatingInvitation ─────────┤
//!        │            └─ nobody invited ──────────────────────────────────┤
//!        │                                                                ▼
//!        │          CheckingIdentity { proving ∥ verifying } (both Done) ─┐
//!        ▼                                                                │
//! Negotiating ◄───────────────────────────────────────────────────────────┘
//!        │ SEED opened
//!        ▼
//! Synchronizing ── heads equal ──► Connected
//!
//! Any state ── ERROR / DISCONNECT / failure ──► Disconnected
//! ```
//!
//! The machine is synchronous and pure: each call takes one event, runs every
//! eventless transition that becomes enabled, and returns the messages to send
//! and the events to emit. It never touches the transport or the clock; time
//! arrives through [`Environment::now`] and deadlines are checked on `Tick`.

use std::{
    fmt,
    time::{Duration, Instant},
};

use teamlink_crypto::{CryptoError, symmetric};
use teamlink_proto::{
    Challenge, ConnectionErrorType, ConnectionMessage, ErrorPayload, IdentityClaim,
};
use tracing::{debug, error, info, warn};

use crate::{
    connection::ConnectionEvent,
    context::{ConnectionContext, is_invitee_member_claim},
    env::{Environment, random_array},
    error::Fault,
    identity, negotiation,
    team::Team,
};

/// Progress proving our own identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvingState {
    /// Waiting for the peer's challenge
    AwaitingIdentityChallenge,
    /// Proof sent, waiting for acceptance
    AwaitingIdentityAcceptance,
    /// The peer accepted us (or already knew us from our invitation)
    Done,
}

/// Progress verifying the peer's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyingState {
    /// About to look up the peer and challenge it
    ChallengingIdentity,
    /// Challenge sent, waiting for the proof
    AwaitingIdentityProof,
    /// We accepted the peer (or admitted it from its invitation)
    Done,
}

/// Sub-states of [`ConnectionState::Authenticating`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticatingState {
    /// Deciding who, if anyone, presented an invitation
    CheckingInvitations,
    /// We are invited; waiting for the peer to accept us
    AwaitingInvitationAcceptance,
    /// The peer is invited; checking its proof
    ValidatingInvitation,
    /// Mutual signature challenge, two independent regions
    CheckingIdentity {
        /// Our side
        proving: ProvingState,
        /// Their side
        verifying: VerifyingState,
    },
}

/// Top-level connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting until both peers have sent identity claims
    AwaitingIdentityClaim,
    /// Invitation handling and identity challenges
    Authenticating(AuthenticatingState),
    /// Exchanging session seeds
    Negotiating,
    /// Exchanging sync messages until heads agree
    Synchronizing,
    /// Authenticated, keyed and in sync
    Connected,
    /// Terminal
    Disconnected,
}

impl ConnectionState {
    /// Whether the machine has stopped for good.
    pub fn is_terminal(self) -> bool {
        self == Self::Disconnected
    }
}

impl fmt::Display for ProvingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AwaitingIdentityChallenge => "awaitingIdentityChallenge",
            Self::AwaitingIdentityAcceptance => "awaitingIdentityAcceptance",
            Self::Done => "done",
        })
    }
}

impl fmt::Display for VerifyingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ChallengingIdentity => "challengingIdentity",
            Self::AwaitingIdentityProof => "awaitingIdentityProof",
            Self::Done => "done",
        })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingIdentityClaim => f.write_str("awaitingIdentityClaim"),
            Self::Authenticating(AuthenticatingState::CheckingInvitations) => {
                f.write_str("authenticating.checkingInvitations")
            },
            Self::Authenticating(AuthenticatingState::AwaitingInvitationAcceptance) => {
                f.write_str("authenticating.awaitingInvitationAcceptance")
            },
            Self::Authenticating(AuthenticatingState::ValidatingInvitation) => {
                f.write_str("authenticating.validatingInvitation")
            },
            Self::Authenticating(AuthenticatingState::CheckingIdentity { proving, verifying }) => {
                write!(
                    f,
                    "authenticating.checkingIdentity[proving.{proving}, verifying.{verifying}]"
                )
            },
            Self::Negotiating => f.write_str("negotiating"),
            Self::Synchronizing => f.write_str("synchronizing"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Input to the machine.
#[derive(Debug, Clone)]
pub(crate) enum MachineEvent {
    /// In-order message from the peer (never `REQUEST_RESEND`)
    Message(ConnectionMessage),
    /// Our team history changed
    LocalUpdate,
    /// The application stopped the connection
    LocalDisconnect,
    /// Check deadlines against the current time
    Tick,
}

/// Output of the machine.
#[derive(Debug, Clone)]
pub(crate) enum MachineAction<T> {
    Send(ConnectionMessage),
    Emit(ConnectionEvent<T>),
}

/// Wait-state deadlines. `main` covers the top-level waits, the other two
/// cover the parallel regions of `CheckingIdentity`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Deadlines {
    main: Option<Instant>,
    proving: Option<Instant>,
    verifying: Option<Instant>,
}

impl Deadlines {
    fn expired(&self, now: Instant) -> bool {
        [self.main, self.proving, self.verifying].into_iter().flatten().any(|at| now >= at)
    }

    fn next(&self) -> Option<Instant> {
        [self.main, self.proving, self.verifying].into_iter().flatten().min()
    }
}

impl ProvingState {
    fn waits(self) -> bool {
        matches!(self, Self::AwaitingIdentityChallenge | Self::AwaitingIdentityAcceptance)
    }
}

impl VerifyingState {
    fn waits(self) -> bool {
        self == Self::AwaitingIdentityProof
    }
}

type Actions<T> = Vec<MachineAction<T>>;

/// The connection protocol machine.
pub(crate) struct Machine<T: Team> {
    state: ConnectionState,
    context: ConnectionContext<T>,
    timeout: Duration,
    deadlines: Deadlines,
}

impl<T: Team> Machine<T> {
    pub(crate) fn new(context: ConnectionContext<T>, timeout: Duration) -> Self {
        Self {
            state: ConnectionState::AwaitingIdentityClaim,
            context,
            timeout,
            deadlines: Deadlines::default(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn context(&self) -> &ConnectionContext<T> {
        &self.context
    }

    /// Earliest pending deadline, for drivers that schedule ticks.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.next()
    }

    /// Run the entry action of the initial state.
    pub(crate) fn start<E: Environment>(&mut self, env: &E) -> Actions<T> {
        let mut out = vec![
            MachineAction::Emit(ConnectionEvent::Change(self.state.to_string())),
            MachineAction::Send(ConnectionMessage::RequestIdentity),
        ];
        self.settle_or_fail(env, &mut out);
        out
    }

    /// Process one event and every eventless transition it enables.
    pub(crate) fn handle<E: Environment>(&mut self, event: MachineEvent, env: &E) -> Actions<T> {
        let mut out = Vec::new();
        if self.state.is_terminal() {
            debug!(?event, "ignoring event after disconnect");
            return out;
        }

        if let Err(fault) = self.dispatch(event, env, &mut out) {
            self.fault(&fault, &mut out);
        }
        self.settle_or_fail(env, &mut out);
        out
    }

    fn dispatch<E: Environment>(
        &mut self,
        event: MachineEvent,
        env: &E,
        out: &mut Actions<T>,
    ) -> Result<(), Fault> {
        match event {
            MachineEvent::Tick => {
                if self.deadlines.expired(env.now()) {
                    warn!(state = %self.state, "peer did not respond in time");
                    self.fail(ConnectionErrorType::Timeout, out);
                }
                Ok(())
            },
            MachineEvent::LocalDisconnect => {
                self.disconnect(out);
                Ok(())
            },
            MachineEvent::LocalUpdate => {
                if self.state == ConnectionState::Connected {
                    self.send_sync_message(out)?;
                }
                Ok(())
            },
            MachineEvent::Message(message) => self.receive(message, env, out),
        }
    }

    fn receive<E: Environment>(
        &mut self,
        message: ConnectionMessage,
        env: &E,
        out: &mut Actions<T>,
    ) -> Result<(), Fault> {
        use AuthenticatingState::{AwaitingInvitationAcceptance, CheckingIdentity};
        use ConnectionMessage as M;
        use ConnectionState::{Authenticating, Connected, Negotiating, Synchronizing};

        match (self.state, message) {
            (_, M::Error(payload)) => {
                self.receive_error(payload, out);
            },
            (_, M::Disconnect) => {
                info!("peer disconnected");
                self.disconnect(out);
            },
            (ConnectionState::AwaitingIdentityClaim, M::RequestIdentity) => {
                if self.context.our_identity_claim.is_none() {
                    self.send_identity_claim(out)?;
                }
            },
            (ConnectionState::AwaitingIdentityClaim, M::ClaimIdentity(_)) if self.context.their_identity_claim.is_some() => {
                debug!("ignoring repeated identity claim");
            },
            (ConnectionState::AwaitingIdentityClaim, M::ClaimIdentity(claim)) => {
                debug!(invitee = claim.proof_of_invitation().is_some(), "received identity claim");
                self.context.their_device = claim.device().cloned();
                self.context.their_identity_claim = Some(claim);
            },
            (Authenticating(AwaitingInvitationAcceptance), M::AcceptInvitation { serialized_graph, team_keyring }) => {
                if self.joined_the_right_team(&serialized_graph, &team_keyring)? {
                    self.join_team(&serialized_graph, &team_keyring, out)?;
                    self.enter_checking_identity(env.now(), out);
                } else {
                    self.fail(ConnectionErrorType::JoinedWrongTeam, out);
                }
            },
            (
                Authenticating(CheckingIdentity {
                    proving: ProvingState::AwaitingIdentityChallenge,
                    verifying,
                }),
                M::ChallengeIdentity { challenge },
            ) => {
                self.prove_identity(challenge, out)?;
                self.goto(
                    Authenticating(CheckingIdentity {
                        proving: ProvingState::AwaitingIdentityAcceptance,
                        verifying,
                    }),
                    env.now(),
                    out,
                );
            },
            (
                Authenticating(CheckingIdentity {
                    proving: ProvingState::AwaitingIdentityAcceptance,
                    verifying,
                }),
                M::AcceptIdentity,
            ) => {
                debug!("peer accepted our identity");
                self.goto(
                    Authenticating(CheckingIdentity { proving: ProvingState::Done, verifying }),
                    env.now(),
                    out,
                );
            },
            (
                Authenticating(CheckingIdentity {
                    proving,
                    verifying: VerifyingState::AwaitingIdentityProof,
                }),
                M::ProveIdentity { challenge, proof },
            ) => {
                if self.identity_is_valid(&challenge, &proof) {
                    debug!("peer proved its identity");
                    self.send(ConnectionMessage::AcceptIdentity, out);
                    self.goto(
                        Authenticating(CheckingIdentity { proving, verifying: VerifyingState::Done }),
                        env.now(),
                        out,
                    );
                } else {
                    self.fail(ConnectionErrorType::IdentityProofInvalid, out);
                }
            },
            (Negotiating, M::Seed { encrypted_seed }) => {
                if self.derive_shared_key(&encrypted_seed, out)? {
                    self.goto(Synchronizing, env.now(), out);
                    self.send_sync_message(out)?;
                }
            },
            (Synchronizing | Connected, M::Sync { sync_message }) => {
                self.receive_sync_message(&sync_message, out)?;
                self.send_sync_message(out)?;
            },
            (Connected, M::EncryptedMessage { cipher }) => {
                self.receive_encrypted_message(&cipher, out)?;
            },
            (state, message) => {
                debug!(%state, kind = message.kind(), "ignoring message not handled in this state");
            },
        }
        Ok(())
    }

    /// Run eventless transitions until the state stops changing.
    fn settle<E: Environment>(&mut self, env: &E, out: &mut Actions<T>) -> Result<(), Fault> {
        use AuthenticatingState::{
            AwaitingInvitationAcceptance, CheckingIdentity, CheckingInvitations,
            ValidatingInvitation,
        };
        use ConnectionState::{Authenticating, AwaitingIdentityClaim, Connected, Synchronizing};

        loop {
            let before = self.state;
            let now = env.now();

            match self.state {
                AwaitingIdentityClaim => {
                    if self.context.both_sent_identity_claim() {
                        self.goto(Authenticating(CheckingInvitations), now, out);
                    }
                },
                Authenticating(CheckingInvitations) => {
                    if self.context.neither_is_member() {
                        self.fail(ConnectionErrorType::NeitherIsMember, out);
                    } else if self.context.we_have_invitation() {
                        self.goto(Authenticating(AwaitingInvitationAcceptance), now, out);
                    } else if self.context.they_have_invitation() {
                        self.goto(Authenticating(ValidatingInvitation), now, out);
                    } else {
                        self.enter_checking_identity(now, out);
                    }
                },
                Authenticating(ValidatingInvitation) => {
                    if self.invitation_is_valid()? {
                        self.accept_invitation(out)?;
                        self.enter_checking_identity(now, out);
                    } else {
                        self.fail(ConnectionErrorType::InvitationProofInvalid, out);
                    }
                },
                Authenticating(CheckingIdentity { proving, verifying }) => {
                    let proving = if proving == ProvingState::AwaitingIdentityChallenge
                        && self.context.we_have_invitation()
                    {
                        ProvingState::Done
                    } else {
                        proving
                    };

                    let verifying = if verifying == VerifyingState::ChallengingIdentity {
                        if self.context.they_have_invitation() {
                            VerifyingState::Done
                        } else if self.device_unknown()? {
                            self.fail(ConnectionErrorType::DeviceUnknown, out);
                            return Ok(());
                        } else {
                            self.challenge_identity(env, out)?;
                            VerifyingState::AwaitingIdentityProof
                        }
                    } else {
                        verifying
                    };

                    if proving == ProvingState::Done && verifying == VerifyingState::Done {
                        self.goto(ConnectionState::Negotiating, now, out);
                        self.send_seed(env, out)?;
                    } else {
                        self.goto(Authenticating(CheckingIdentity { proving, verifying }), now, out);
                    }
                },
                Synchronizing => {
                    if self.heads_are_equal()? {
                        self.goto(Connected, now, out);
                        info!(peer = self.peer_name(), "connected");
                        out.push(MachineAction::Emit(ConnectionEvent::Connected));
                    }
                },
                Connected => {
                    if let Some(error_type) = self.peer_removal()? {
                        self.fail(error_type, out);
                    }
                },
                _ => {},
            }

            if self.state == before {
                return Ok(());
            }
        }
    }

    fn settle_or_fail<E: Environment>(&mut self, env: &E, out: &mut Actions<T>) {
        if self.state.is_terminal() {
            return;
        }
        if let Err(fault) = self.settle(env, out) {
            self.fault(&fault, out);
        }
    }

    /// Move to `next`, arming the deadline of every wait state being entered.
    fn goto(&mut self, next: ConnectionState, now: Instant, out: &mut Actions<T>) {
        use AuthenticatingState::{AwaitingInvitationAcceptance, CheckingIdentity};

        if next == self.state {
            return;
        }

        let deadline = now + self.timeout;
        self.deadlines = match next {
            ConnectionState::Authenticating(AwaitingInvitationAcceptance)
            | ConnectionState::Negotiating => Deadlines { main: Some(deadline), ..Deadlines::default() },
            ConnectionState::Authenticating(CheckingIdentity { proving, verifying }) => {
                let (was_proving, was_verifying) = match self.state {
                    ConnectionState::Authenticating(CheckingIdentity { proving, verifying }) => {
                        (Some(proving), Some(verifying))
                    },
                    _ => (None, None),
                };
                Deadlines {
                    main: None,
                    proving: match (proving.waits(), was_proving == Some(proving)) {
                        (false, _) => None,
                        (true, true) => self.deadlines.proving,
                        (true, false) => Some(deadline),
                    },
                    verifying: match (verifying.waits(), was_verifying == Some(verifying)) {
                        (false, _) => None,
                        (true, true) => self.deadlines.verifying,
                        (true, false) => Some(deadline),
                    },
                }
            },
            _ => Deadlines::default(),
        };

        debug!(from = %self.state, to = %next, "state change");
        self.state = next;
        out.push(MachineAction::Emit(ConnectionEvent::Change(next.to_string())));
    }

    fn send(&self, message: ConnectionMessage, out: &mut Actions<T>) {
        out.push(MachineAction::Send(message));
    }

    fn team(&self) -> Result<&T, Fault> {
        self.context.team.as_ref().ok_or(Fault::MissingContext("team"))
    }

    fn peer_name(&self) -> &str {
        self.context.peer.as_ref().map_or("?", |peer| peer.user_name.as_str())
    }

    // IDENTITY CLAIMS

    fn send_identity_claim(&mut self, out: &mut Actions<T>) -> Result<(), Fault> {
        let claim = self.context.create_identity_claim()?;
        self.send(ConnectionMessage::ClaimIdentity(claim.clone()), out);
        self.context.our_identity_claim = Some(claim);
        Ok(())
    }

    // INVITATIONS

    fn invitation_is_valid(&self) -> Result<bool, Fault> {
        let proof = self
            .context
            .their_identity_claim
            .as_ref()
            .and_then(IdentityClaim::proof_of_invitation)
            .ok_or(Fault::MissingContext("invitation proof"))?;
        Ok(self.team()?.validate_invitation(proof))
    }

    fn accept_invitation(&mut self, out: &mut Actions<T>) -> Result<(), Fault> {
        let team = self.team()?.clone();
        let claim = self
            .context
            .their_identity_claim
            .clone()
            .ok_or(Fault::MissingContext("identity claim"))?;

        let peer = match &claim {
            IdentityClaim::InviteeMember { proof_of_invitation, user_name, user_keys, .. } => {
                team.admit_member(proof_of_invitation, user_keys, user_name)
            },
            IdentityClaim::InviteeDevice { proof_of_invitation, device, .. } => {
                team.admit_device(proof_of_invitation, device)
            },
            IdentityClaim::Member { .. } => return Err(Fault::MissingContext("invitation proof")),
        }
        .map_err(Fault::team)?;

        info!(
            peer = %peer.user_name,
            new_member = is_invitee_member_claim(&claim),
            "admitted invitee"
        );
        self.context.peer = Some(peer);

        self.send(
            ConnectionMessage::AcceptInvitation {
                serialized_graph: team.save().map_err(Fault::team)?,
                team_keyring: team.team_keyring().map_err(Fault::team)?,
            },
            out,
        );
        Ok(())
    }

    fn joined_the_right_team(&self, serialized_graph: &[u8], team_keyring: &[u8]) -> Result<bool, Fault> {
        let seed = self
            .context
            .role
            .invitation_seed()
            .ok_or(Fault::MissingContext("invitation seed"))?;
        let id = teamlink_crypto::invitation::invitation_id(seed)?;
        Ok(T::contains_invitation(serialized_graph, team_keyring, &id))
    }

    fn join_team(
        &mut self,
        serialized_graph: &[u8],
        team_keyring: &[u8],
        out: &mut Actions<T>,
    ) -> Result<(), Fault> {
        let seed = self
            .context
            .role
            .invitation_seed()
            .ok_or(Fault::MissingContext("invitation seed"))?;
        let (team, user) = T::join(
            serialized_graph,
            team_keyring,
            seed,
            self.context.user.as_ref(),
            &self.context.device,
        )
        .map_err(Fault::team)?;

        info!(user = %user.user_name, "joined team");
        self.context.team = Some(team.clone());
        self.context.user = Some(user.clone());
        out.push(MachineAction::Emit(ConnectionEvent::Joined { team, user }));
        Ok(())
    }

    // AUTHENTICATION

    fn enter_checking_identity(&mut self, now: Instant, out: &mut Actions<T>) {
        self.goto(
            ConnectionState::Authenticating(AuthenticatingState::CheckingIdentity {
                proving: ProvingState::AwaitingIdentityChallenge,
                verifying: VerifyingState::ChallengingIdentity,
            }),
            now,
            out,
        );
    }

    fn their_device_id(&self) -> Result<&str, Fault> {
        match &self.context.their_identity_claim {
            Some(IdentityClaim::Member { device_id }) => Ok(device_id),
            _ => Err(Fault::MissingContext("member claim")),
        }
    }

    fn device_unknown(&self) -> Result<bool, Fault> {
        let device_id = self.their_device_id()?;
        Ok(!self.team()?.has_device(device_id, true))
    }

    fn challenge_identity<E: Environment>(&mut self, env: &E, out: &mut Actions<T>) -> Result<(), Fault> {
        let device_id = self.their_device_id()?.to_owned();
        let team = self.team()?;
        let their_device = team.device(&device_id);
        let peer = team.member_by_device_id(&device_id);

        let challenge = identity::challenge(&device_id, random_array(env));
        debug!(device = %device_id, "challenging peer identity");
        self.send(ConnectionMessage::ChallengeIdentity { challenge: challenge.clone() }, out);

        self.context.their_device = their_device;
        self.context.peer = peer;
        self.context.challenge = Some(challenge);
        Ok(())
    }

    fn prove_identity(&self, challenge: Challenge, out: &mut Actions<T>) -> Result<(), Fault> {
        let proof = identity::prove(&challenge, &self.context.device.keys)?;
        self.send(ConnectionMessage::ProveIdentity { challenge, proof }, out);
        Ok(())
    }

    fn identity_is_valid(&self, challenge: &Challenge, proof: &[u8]) -> bool {
        let (Some(issued), Some(device)) = (&self.context.challenge, &self.context.their_device) else {
            return false;
        };
        issued == challenge && identity::verify(challenge, proof, &device.keys)
    }

    // SHARED SECRET NEGOTIATION

    fn send_seed<E: Environment>(&mut self, env: &E, out: &mut Actions<T>) -> Result<(), Fault> {
        let seed = *self.context.seed.get_or_insert_with(|| random_array(env));
        let their_device = self.context.their_device.as_ref().ok_or(Fault::MissingContext("their device"))?;

        let encrypted_seed =
            negotiation::encrypt_seed(&seed, &self.context.device, their_device, random_array(env))?;
        self.send(ConnectionMessage::Seed { encrypted_seed }, out);
        Ok(())
    }

    /// Returns `false` when the peer's seed did not open and the connection failed.
    fn derive_shared_key(&mut self, encrypted_seed: &[u8], out: &mut Actions<T>) -> Result<bool, Fault> {
        let seed = self.context.seed.ok_or(Fault::MissingContext("seed"))?;
        let their_device = self.context.their_device.as_ref().ok_or(Fault::MissingContext("their device"))?;

        match negotiation::derive_session_key(&seed, encrypted_seed, &self.context.device, their_device) {
            Ok(key) => {
                self.context.session_key = Some(key);
                Ok(true)
            },
            Err(e) if negotiation::is_wrong_key(&e) => {
                warn!(error = %e, "could not open seed with the peer's device keys");
                self.fail(ConnectionErrorType::EncryptionFailure, out);
                Ok(false)
            },
            Err(e) => Err(e.into()),
        }
    }

    // SYNCHRONIZATION

    fn send_sync_message(&mut self, out: &mut Actions<T>) -> Result<(), Fault> {
        let team = self.team()?;
        let (sync_state, message) = team.generate_sync_message(&self.context.sync_state).map_err(Fault::team)?;
        self.context.sync_state = sync_state;

        match message {
            Some(sync_message) => {
                debug!(bytes = sync_message.len(), "sending sync message");
                self.send(ConnectionMessage::Sync { sync_message }, out);
            },
            None => debug!("no sync message to send"),
        }
        Ok(())
    }

    fn receive_sync_message(&mut self, sync_message: &[u8], out: &mut Actions<T>) -> Result<(), Fault> {
        let team = self.team()?;
        let (sync_state, changed) = team
            .receive_sync_message(&self.context.sync_state, sync_message, &self.context.device)
            .map_err(Fault::team)?;
        self.context.sync_state = sync_state;

        if changed {
            debug!("team updated from peer");
            out.push(MachineAction::Emit(ConnectionEvent::Updated));
        }
        Ok(())
    }

    fn heads_are_equal(&self) -> Result<bool, Fault> {
        Ok(self.team()?.heads_equal(&self.context.sync_state))
    }

    fn peer_removal(&self) -> Result<Option<ConnectionErrorType>, Fault> {
        let team = self.team()?;
        let Some(peer) = &self.context.peer else {
            return Ok(None);
        };

        if team.member_was_removed(&peer.user_id) {
            return Ok(Some(ConnectionErrorType::MemberRemoved));
        }
        if let Some(device) = &self.context.their_device
            && team.device_was_removed(&device.device_id)
        {
            return Ok(Some(ConnectionErrorType::DeviceRemoved));
        }
        if team.server_was_removed(&peer.user_id) {
            return Ok(Some(ConnectionErrorType::ServerRemoved));
        }
        Ok(None)
    }

    // ENCRYPTED COMMUNICATION

    fn receive_encrypted_message(&mut self, cipher: &[u8], out: &mut Actions<T>) -> Result<(), Fault> {
        let key = self.context.session_key.as_ref().ok_or(Fault::MissingContext("session key"))?;
        match symmetric::decrypt(cipher, key.as_bytes()) {
            Ok(plaintext) => out.push(MachineAction::Emit(ConnectionEvent::Message(plaintext))),
            Err(e @ CryptoError::DecryptionFailed) => {
                warn!(error = %e, "could not decrypt message with the session key");
                self.fail(ConnectionErrorType::EncryptionFailure, out);
            },
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    // FAILURE

    fn receive_error(&mut self, payload: ErrorPayload, out: &mut Actions<T>) {
        warn!(error = payload.error_type.code(), message = %payload.message, "peer reported an error");
        self.context.error = Some(payload.clone());
        out.push(MachineAction::Emit(ConnectionEvent::RemoteError(payload)));
        self.disconnect(out);
    }

    /// Tell the peer, surface the error locally and disconnect.
    fn fail(&mut self, error_type: ConnectionErrorType, out: &mut Actions<T>) {
        warn!(error = error_type.code(), state = %self.state, "connection failed");
        let payload = ErrorPayload::from(error_type);
        self.context.error = Some(payload.clone());
        self.send(ConnectionMessage::Error(payload.clone()), out);
        out.push(MachineAction::Emit(ConnectionEvent::LocalError(payload)));
        self.disconnect(out);
    }

    /// Fail with `UNHANDLED` for a fault raised outside the machine.
    pub(crate) fn report(&mut self, fault: &Fault) -> Actions<T> {
        let mut out = Vec::new();
        self.fault(fault, &mut out);
        out
    }

    fn fault(&mut self, fault: &Fault, out: &mut Actions<T>) {
        if self.state.is_terminal() {
            return;
        }
        error!(error = %fault, state = %self.state, "unhandled error in connection");
        self.fail(ConnectionErrorType::Unhandled, out);
    }

    fn disconnect(&mut self, out: &mut Actions<T>) {
        if self.state.is_terminal() {
            return;
        }
        self.deadlines = Deadlines::default();
        self.state = ConnectionState::Disconnected;
        out.push(MachineAction::Emit(ConnectionEvent::Change(self.state.to_string())));
        out.push(MachineAction::Emit(ConnectionEvent::Disconnected {
            error: self.context.error.clone(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use teamlink_crypto::{Hash, InvitationId, Keyset, KeysetWithSecrets, ProofOfInvitation};
    use teamlink_proto::{Device, DeviceWithSecrets, Member, ProtocolError, UserWithSecrets};

    use super::*;
    use crate::context::Context;

    /// Team for machines that never reach a team operation.
    #[derive(Debug, Clone)]
    struct Untouched;

    impl Team for Untouched {
        type SyncState = ();
        type Error = fmt::Error;

        fn validate_invitation(&self, _: &ProofOfInvitation) -> bool {
            unreachable!()
        }

        fn admit_member(&self, _: &ProofOfInvitation, _: &Keyset, _: &str) -> Result<Member, fmt::Error> {
            unreachable!()
        }

        fn admit_device(&self, _: &ProofOfInvitation, _: &Device) -> Result<Member, fmt::Error> {
            unreachable!()
        }

        fn save(&self) -> Result<Vec<u8>, fmt::Error> {
            unreachable!()
        }

        fn team_keyring(&self) -> Result<Vec<u8>, fmt::Error> {
            unreachable!()
        }

        fn contains_invitation(_: &[u8], _: &[u8], _: &InvitationId) -> bool {
            unreachable!()
        }

        fn join(
            _: &[u8],
            _: &[u8],
            _: &str,
            _: Option<&UserWithSecrets>,
            _: &DeviceWithSecrets,
        ) -> Result<(Self, UserWithSecrets), fmt::Error> {
            unreachable!()
        }

        fn has_device(&self, _: &str, _: bool) -> bool {
            unreachable!()
        }

        fn device(&self, _: &str) -> Option<Device> {
            unreachable!()
        }

        fn member_by_device_id(&self, _: &str) -> Option<Member> {
            unreachable!()
        }

        fn member_was_removed(&self, _: &str) -> bool {
            unreachable!()
        }

        fn device_was_removed(&self, _: &str) -> bool {
            unreachable!()
        }

        fn server_was_removed(&self, _: &str) -> bool {
            unreachable!()
        }

        fn head(&self) -> Vec<Hash> {
            unreachable!()
        }

        fn generate_sync_message(&self, _: &()) -> Result<((), Option<Vec<u8>>), fmt::Error> {
            unreachable!()
        }

        fn receive_sync_message(&self, _: &(), _: &[u8], _: &DeviceWithSecrets) -> Result<((), bool), fmt::Error> {
            unreachable!()
        }

        fn heads_equal(&self, _: &()) -> bool {
            unreachable!()
        }
    }

    fn invitee_machine() -> Machine<Untouched> {
        let device = DeviceWithSecrets {
            user_id: "bob".into(),
            device_id: "bob-phone".into(),
            device_name: "phone".into(),
            keys: KeysetWithSecrets::from_secret_bytes("bob-phone", &[3u8; 64]),
            device_info: None,
        };
        let context = Context::InviteeDevice { user_name: "bob".into(), device, invitation_seed: "seed".into() };
        Machine::new(ConnectionContext::from(context), Duration::from_secs(7))
    }

    #[test]
    fn reported_fault_fails_with_unhandled() {
        let mut machine = invitee_machine();
        let actions = machine.report(&Fault::from(ProtocolError::Encode("broken".into())));

        assert!(matches!(
            actions.first(),
            Some(MachineAction::Send(ConnectionMessage::Error(payload)))
                if payload.error_type == ConnectionErrorType::Unhandled
        ));
        assert!(actions.iter().any(|action| matches!(
            action,
            MachineAction::Emit(ConnectionEvent::LocalError(payload))
                if payload.error_type == ConnectionErrorType::Unhandled
        )));
        assert_eq!(machine.state(), ConnectionState::Disconnected);

        // Nothing more once disconnected
        assert!(machine.report(&Fault::MissingContext("team")).is_empty());
    }

    #[test]
    fn summaries() {
        insta::assert_snapshot!(ConnectionState::AwaitingIdentityClaim, @"awaitingIdentityClaim");
        insta::assert_snapshot!(
            ConnectionState::Authenticating(AuthenticatingState::CheckingIdentity {
                proving: ProvingState::AwaitingIdentityAcceptance,
                verifying: VerifyingState::Done,
            }),
            @"authenticating.checkingIdentity[proving.awaitingIdentityAcceptance, verifying.done]"
        );
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }

    #[test]
    fn deadlines_expire_at_the_earliest() {
        #[allow(clippy::disallowed_methods)]
        let start = Instant::now();
        let deadlines = Deadlines {
            main: None,
            proving: Some(start + Duration::from_secs(7)),
            verifying: Some(start + Duration::from_secs(3)),
        };
        assert_eq!(deadlines.next(), Some(start + Duration::from_secs(3)));
        assert!(!deadlines.expired(start + Duration::from_secs(2)));
        assert!(deadlines.expired(start + Duration::from_secs(3)));
        assert!(!Deadlines::default().expired(start + Duration::from_secs(100)));
    }

    #[test]
    fn only_disconnected_is_terminal() {
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
    }
}
