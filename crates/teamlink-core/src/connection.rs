//! Connection orchestrator.
//!
//! A [`Connection`] owns one [`MessageQueue`] and one protocol machine. Bytes
//! from the transport go in through [`Connection::deliver`]; everything the
//! caller must do comes back as [`ConnectionAction`]s:
//!
//! ```text
//! transport bytes ─► decode ─► MessageQueue ─► (in order) ─► Machine
//!                                   ▲                           │
//!        Transmit(bytes) ◄─ encode ─┴──────── Send(message) ◄───┤
//!        Emit(event)     ◄──────────────────────────────────────┘
//! ```
//!
//! `REQUEST_RESEND` never reaches the machine: it is answered by the queue's
//! log as soon as it arrives, even when it arrives out of order.

use std::time::{Duration, Instant};

use teamlink_crypto::{SessionKey, symmetric};
use teamlink_proto::{
    ConnectionMessage, ErrorPayload, Member, NumberedMessage, UserWithSecrets,
};
use tracing::{Span, debug, error, info, info_span};

use crate::{
    context::{ConnectionContext, Context},
    env::{Environment, random_array},
    error::{ConnectionError, Fault},
    machine::{ConnectionState, Machine, MachineAction, MachineEvent},
    queue::{MessageQueue, QueueEvent},
    team::Team,
};

/// Default time a wait state may last before failing with `TIMEOUT`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(7);

/// Tunables for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long any wait state may last before the connection fails
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT }
    }
}

/// Something the application should know about.
#[derive(Debug, Clone)]
pub enum ConnectionEvent<T> {
    /// Authenticated, keyed and in sync
    Connected,
    /// We joined a team through our invitation
    Joined {
        /// The team we joined
        team: T,
        /// Our user, including keys recovered from the team for device invitees
        user: UserWithSecrets,
    },
    /// Our team history changed because of the peer
    Updated,
    /// Decrypted application payload from the peer
    Message(Vec<u8>),
    /// Summary of the new machine state
    Change(String),
    /// The peer reported an error and disconnected
    RemoteError(ErrorPayload),
    /// We detected an error, told the peer and disconnected
    LocalError(ErrorPayload),
    /// The connection is over
    Disconnected {
        /// The error that ended it, if any
        error: Option<ErrorPayload>,
    },
}

/// Output of every [`Connection`] call.
#[derive(Debug, Clone)]
pub enum ConnectionAction<T> {
    /// Hand these bytes to the transport
    Transmit(Vec<u8>),
    /// Surface this event to the application
    Emit(ConnectionEvent<T>),
}

/// Secure, authenticated connection with one peer.
pub struct Connection<E: Environment, T: Team> {
    env: E,
    machine: Machine<T>,
    queue: MessageQueue<ConnectionMessage>,
    started: bool,
    span: Span,
}

impl<E: Environment, T: Team> Connection<E, T> {
    /// Create a connection. Nothing is sent until [`Connection::start`].
    pub fn new(env: E, context: Context<T>, config: ConnectionConfig) -> Self {
        let context = ConnectionContext::from(context);
        let span = info_span!(
            "connection",
            user = %context.user_name(),
            invitee = context.role.is_invitee(),
            peer = tracing::field::Empty,
        );

        Self {
            env,
            machine: Machine::new(context, config.timeout),
            queue: MessageQueue::new(),
            started: false,
            span,
        }
    }

    /// Start the machine and the queue, then replay `buffered` messages that
    /// arrived before the connection existed. Undecodable buffered messages
    /// are skipped. Calling it again does nothing.
    pub fn start(&mut self, buffered: &[Vec<u8>]) -> Vec<ConnectionAction<T>> {
        if self.started {
            return Vec::new();
        }

        let span = self.span.clone();
        let _enter = span.enter();
        info!(buffered = buffered.len(), "starting");

        self.started = true;
        self.queue.start();

        let mut actions = Vec::new();
        let started = self.machine.start(&self.env);
        self.apply(started, &mut actions);

        for bytes in buffered {
            match self.deliver(bytes) {
                Ok(replayed) => actions.extend(replayed),
                Err(e) => debug!(error = %e, "skipping buffered message"),
            }
        }
        actions
    }

    /// Disconnect locally, tell the peer and stop the queue.
    pub fn stop(&mut self) -> Vec<ConnectionAction<T>> {
        let span = self.span.clone();
        let _enter = span.enter();

        let mut actions = Vec::new();
        if self.started && !self.machine.state().is_terminal() {
            let stopped = self.machine.handle(MachineEvent::LocalDisconnect, &self.env);
            self.apply(stopped, &mut actions);
            self.transmit(ConnectionMessage::Disconnect, &mut actions);
        }
        let buffered = self.queue.buffered();
        self.queue.stop();
        info!(
            buffered,
            sent = self.queue.next_outbound_index(),
            received = self.queue.next_inbound_index(),
            "connection stopped"
        );
        actions
    }

    /// Accept bytes from the transport.
    pub fn deliver(&mut self, bytes: &[u8]) -> Result<Vec<ConnectionAction<T>>, ConnectionError> {
        if !self.started {
            return Err(ConnectionError::NotStarted);
        }
        let span = self.span.clone();
        let _enter = span.enter();

        let numbered = NumberedMessage::from_bytes(bytes)?;
        debug!(
            direction = "in",
            index = numbered.index,
            kind = numbered.message.kind(),
            peer = self.peer_name(),
            "message"
        );

        let mut actions = Vec::new();
        if let ConnectionMessage::RequestResend { index } = numbered.message
            && self.queue.is_new(numbered.index)
        {
            self.resend(index, &mut actions);
        }

        for event in self.queue.receive(numbered) {
            match event {
                // Answered on arrival
                QueueEvent::Deliver(ConnectionMessage::RequestResend { .. }) => {},
                QueueEvent::Deliver(message) => {
                    let handled = self.machine.handle(MachineEvent::Message(message), &self.env);
                    self.apply(handled, &mut actions);
                },
                QueueEvent::RequestResend(index) => {
                    self.transmit(ConnectionMessage::RequestResend { index }, &mut actions);
                },
            }
        }
        Ok(actions)
    }

    /// Encrypt `payload` with the session key and send it.
    pub fn send(&mut self, payload: &[u8]) -> Result<Vec<ConnectionAction<T>>, ConnectionError> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.machine.state().is_terminal() {
            return Err(ConnectionError::Disconnected);
        }
        let key = self.session_key().ok_or(ConnectionError::NotConnected)?;
        let cipher = symmetric::encrypt(payload, key.as_bytes(), random_array(&self.env))?;

        let mut actions = Vec::new();
        self.transmit(ConnectionMessage::EncryptedMessage { cipher }, &mut actions);
        Ok(actions)
    }

    /// Our team history changed locally; sync it to the peer if connected.
    pub fn team_updated(&mut self) -> Vec<ConnectionAction<T>> {
        self.run(MachineEvent::LocalUpdate)
    }

    /// Check wait-state deadlines against the environment clock.
    pub fn tick(&mut self) -> Vec<ConnectionAction<T>> {
        self.run(MachineEvent::Tick)
    }

    /// When [`Connection::tick`] next needs to be called, if ever.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.machine.next_deadline()
    }

    /// Current machine state.
    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Our team, once we have one.
    pub fn team(&self) -> Option<&T> {
        self.machine.context().team.as_ref()
    }

    /// The environment this connection reads time and randomness from.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Whether [`Connection::start`] has run.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether a session key has been negotiated.
    pub fn has_session_key(&self) -> bool {
        self.session_key().is_some()
    }

    /// The peer's member record, once known.
    pub fn peer(&self) -> Option<&Member> {
        self.machine.context().peer.as_ref()
    }

    /// The error that ended the connection, if any.
    pub fn error(&self) -> Option<&ErrorPayload> {
        self.machine.context().error.as_ref()
    }

    /// Our user, once known.
    pub fn user(&self) -> Option<&UserWithSecrets> {
        self.machine.context().user.as_ref()
    }

    fn session_key(&self) -> Option<&SessionKey> {
        self.machine.context().session_key.as_ref()
    }

    fn peer_name(&self) -> &str {
        self.peer().map_or("?", |peer| peer.user_name.as_str())
    }

    fn run(&mut self, event: MachineEvent) -> Vec<ConnectionAction<T>> {
        if !self.started {
            return Vec::new();
        }
        let span = self.span.clone();
        let _enter = span.enter();

        let mut actions = Vec::new();
        let handled = self.machine.handle(event, &self.env);
        self.apply(handled, &mut actions);
        actions
    }

    fn apply(&mut self, machine_actions: Vec<MachineAction<T>>, actions: &mut Vec<ConnectionAction<T>>) {
        for action in machine_actions {
            match action {
                MachineAction::Send(message) => self.transmit(message, actions),
                MachineAction::Emit(event) => actions.push(ConnectionAction::Emit(event)),
            }
        }
        if let Some(peer) = self.machine.context().peer.as_ref() {
            self.span.record("peer", peer.user_name.as_str());
        }
    }

    /// Encode first so a message that cannot go out never takes up an index
    /// the peer would wait for.
    fn transmit(&mut self, message: ConnectionMessage, actions: &mut Vec<ConnectionAction<T>>) {
        let numbered = NumberedMessage { index: self.queue.next_outbound_index(), message };
        match numbered.to_bytes() {
            Ok(bytes) => {
                self.log_outbound(&numbered);
                self.queue.send(numbered.message);
                actions.push(ConnectionAction::Transmit(bytes));
            },
            Err(e) => {
                error!(error = %e, kind = numbered.message.kind(), "failed to encode outbound message");
                let failed = self.machine.report(&Fault::from(e));
                self.apply(failed, actions);
            },
        }
    }

    fn resend(&self, from: u64, actions: &mut Vec<ConnectionAction<T>>) {
        let messages = self.queue.resend(from);
        debug!(from, count = messages.len(), "resending");
        for numbered in &messages {
            self.encode_into(numbered, actions);
        }
    }

    fn encode_into(&self, numbered: &NumberedMessage<ConnectionMessage>, actions: &mut Vec<ConnectionAction<T>>) {
        self.log_outbound(numbered);
        match numbered.to_bytes() {
            Ok(bytes) => actions.push(ConnectionAction::Transmit(bytes)),
            Err(e) => error!(error = %e, index = numbered.index, "failed to re-encode logged message"),
        }
    }

    fn log_outbound(&self, numbered: &NumberedMessage<ConnectionMessage>) {
        debug!(
            direction = "out",
            index = numbered.index,
            kind = numbered.message.kind(),
            peer = self.peer_name(),
            "message"
        );
    }
}
