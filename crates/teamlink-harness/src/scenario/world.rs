//! World state for scenario execution.
//!
//! The World owns every connection in a simulation, carries frames between
//! paired connections over a lossy in-memory network and records what each
//! connection emitted. Time only moves when the test advances it.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    time::Duration,
};

use teamlink_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionError, ConnectionEvent,
    ConnectionState, Context,
};
use teamlink_proto::{ConnectionErrorType, ErrorPayload, UserWithSecrets};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{sim_env::SimEnv, team::MemoryTeam};

/// A connection as driven by the harness.
pub type SimConnection = Connection<SimEnv, MemoryTeam>;

/// Event emitted by a [`SimConnection`].
pub type SimEvent = ConnectionEvent<MemoryTeam>;

/// Upper bound on frames carried by one [`World::run`].
const MAX_STEPS: usize = 10_000;

/// Failures while driving a world.
#[derive(Debug, Error)]
pub enum WorldError {
    /// No connection with this name
    #[error("no connection named {0}")]
    UnknownConnection(String),

    /// A connection with this name already exists
    #[error("connection {0} already exists")]
    DuplicateConnection(String),

    /// A connection rejected a call
    #[error("connection {name}: {source}")]
    Connection {
        /// Connection name
        name: String,
        /// What went wrong
        source: ConnectionError,
    },

    /// Frames kept flowing past the step limit
    #[error("network did not go quiet after {0} frames")]
    Livelock(usize),
}

/// Frame to discard on its first transmission.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DropFrame {
    /// Sending connection
    pub from: String,
    /// Zero-based count of frames sent by `from`
    pub nth: usize,
}

/// Network behaviour between connections.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    /// Deliver in-flight frames in random order rather than FIFO
    pub reorder: bool,
    /// Deliver every frame twice
    pub duplicate: bool,
    /// Frames lost on first transmission
    pub drops: BTreeSet<DropFrame>,
}

impl NetworkConfig {
    /// Perfect network: FIFO, no losses, no duplicates.
    pub fn reliable() -> Self {
        Self::default()
    }

    /// Random delivery order.
    pub fn reordering() -> Self {
        Self { reorder: true, ..Self::default() }
    }

    /// Lose the `nth` frame sent by `from`.
    pub fn drop_frame(mut self, from: impl Into<String>, nth: usize) -> Self {
        self.drops.insert(DropFrame { from: from.into(), nth });
        self
    }
}

struct Frame {
    to: String,
    bytes: Vec<u8>,
}

struct Peer {
    connection: SimConnection,
    remote: String,
    /// Frames that arrived before `start`
    pending: Vec<Vec<u8>>,
    events: Vec<SimEvent>,
    sent: usize,
}

/// World state containing all connections and the network between them.
pub struct World {
    env: SimEnv,
    config: ConnectionConfig,
    network: NetworkConfig,
    peers: BTreeMap<String, Peer>,
    in_flight: VecDeque<Frame>,
    frames_delivered: usize,
    frames_dropped: usize,
}

impl World {
    /// Empty world with a reliable network.
    pub fn new(seed: u64) -> Self {
        Self::with_network(seed, NetworkConfig::reliable())
    }

    /// Empty world with the given network behaviour.
    pub fn with_network(seed: u64, network: NetworkConfig) -> Self {
        Self {
            env: SimEnv::with_seed(seed),
            config: ConnectionConfig::default(),
            network,
            peers: BTreeMap::new(),
            in_flight: VecDeque::new(),
            frames_delivered: 0,
            frames_dropped: 0,
        }
    }

    /// Use `config` for connections created from now on.
    pub fn set_connection_config(&mut self, config: ConnectionConfig) {
        self.config = config;
    }

    /// The shared simulated environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Create two connections wired to each other. Neither is started.
    pub fn connect(
        &mut self,
        a: &str,
        a_context: Context<MemoryTeam>,
        b: &str,
        b_context: Context<MemoryTeam>,
    ) -> Result<(), WorldError> {
        for name in [a, b] {
            if self.peers.contains_key(name) {
                return Err(WorldError::DuplicateConnection(name.to_owned()));
            }
        }
        self.add_peer(a, b, a_context);
        self.add_peer(b, a, b_context);
        Ok(())
    }

    fn add_peer(&mut self, name: &str, remote: &str, context: Context<MemoryTeam>) {
        let connection = Connection::new(self.env.clone(), context, self.config.clone());
        self.peers.insert(name.to_owned(), Peer {
            connection,
            remote: remote.to_owned(),
            pending: Vec::new(),
            events: Vec::new(),
            sent: 0,
        });
    }

    /// Start one connection, replaying frames that reached it early.
    pub fn start(&mut self, name: &str) -> Result<(), WorldError> {
        let peer = self.peer_mut(name)?;
        let pending = std::mem::take(&mut peer.pending);
        let actions = peer.connection.start(&pending);
        self.dispatch(name, actions)
    }

    /// Start every connection, in name order.
    pub fn start_all(&mut self) -> Result<(), WorldError> {
        let names: Vec<String> = self.peers.keys().cloned().collect();
        for name in names {
            self.start(&name)?;
        }
        Ok(())
    }

    /// Carry frames until the network is quiet. Returns frames delivered.
    pub fn run(&mut self) -> Result<usize, WorldError> {
        let mut steps = 0;
        while let Some(frame) = self.next_frame() {
            steps += 1;
            if steps > MAX_STEPS {
                return Err(WorldError::Livelock(MAX_STEPS));
            }
            self.deliver(frame)?;
        }
        Ok(steps)
    }

    /// Start everything and run to quiescence.
    pub fn start_and_run(&mut self) -> Result<usize, WorldError> {
        self.start_all()?;
        self.run()
    }

    /// Move the clock forward and let every connection check its deadlines.
    pub fn advance(&mut self, duration: Duration) -> Result<(), WorldError> {
        self.env.advance(duration);
        let names: Vec<String> = self.peers.keys().cloned().collect();
        for name in names {
            let actions = self.peer_mut(&name)?.connection.tick();
            self.dispatch(&name, actions)?;
        }
        Ok(())
    }

    /// Stop one connection.
    pub fn stop(&mut self, name: &str) -> Result<(), WorldError> {
        let actions = self.peer_mut(name)?.connection.stop();
        self.dispatch(name, actions)
    }

    /// Send an application payload from `name` to its peer.
    pub fn send(&mut self, name: &str, payload: &[u8]) -> Result<(), WorldError> {
        let actions = self
            .peer_mut(name)?
            .connection
            .send(payload)
            .map_err(|source| WorldError::Connection { name: name.to_owned(), source })?;
        self.dispatch(name, actions)
    }

    /// Tell every connection holding `team` that it changed.
    pub fn team_changed(&mut self, team: &MemoryTeam) -> Result<(), WorldError> {
        let holders: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.connection.team().is_some_and(|t| t.same_copy(team)))
            .map(|(name, _)| name.clone())
            .collect();
        for name in holders {
            let actions = self.peer_mut(&name)?.connection.team_updated();
            self.dispatch(&name, actions)?;
        }
        Ok(())
    }

    /// Inject raw bytes as if they came from `name`'s peer.
    pub fn inject(&mut self, name: &str, bytes: Vec<u8>) -> Result<(), WorldError> {
        self.deliver(Frame { to: name.to_owned(), bytes })
    }

    /// Connection by name.
    pub fn connection(&self, name: &str) -> Result<&SimConnection, WorldError> {
        self.peer(name).map(|peer| &peer.connection)
    }

    /// Current state of a connection.
    pub fn state(&self, name: &str) -> Result<ConnectionState, WorldError> {
        Ok(self.connection(name)?.state())
    }

    /// Every event a connection emitted, in order.
    pub fn events(&self, name: &str) -> Result<&[SimEvent], WorldError> {
        self.peer(name).map(|peer| peer.events.as_slice())
    }

    /// State summaries from `Change` events.
    pub fn changes(&self, name: &str) -> Result<Vec<String>, WorldError> {
        Ok(self
            .events(name)?
            .iter()
            .filter_map(|event| match event {
                ConnectionEvent::Change(summary) => Some(summary.clone()),
                _ => None,
            })
            .collect())
    }

    /// The error this connection detected itself, if any.
    pub fn local_error(&self, name: &str) -> Result<Option<ConnectionErrorType>, WorldError> {
        Ok(self.events(name)?.iter().find_map(|event| match event {
            ConnectionEvent::LocalError(ErrorPayload { error_type, .. }) => Some(*error_type),
            _ => None,
        }))
    }

    /// The error the peer reported, if any.
    pub fn remote_error(&self, name: &str) -> Result<Option<ConnectionErrorType>, WorldError> {
        Ok(self.events(name)?.iter().find_map(|event| match event {
            ConnectionEvent::RemoteError(ErrorPayload { error_type, .. }) => Some(*error_type),
            _ => None,
        }))
    }

    /// Team and user from a `Joined` event, if the connection joined.
    pub fn joined(&self, name: &str) -> Result<Option<(MemoryTeam, UserWithSecrets)>, WorldError> {
        Ok(self.events(name)?.iter().find_map(|event| match event {
            ConnectionEvent::Joined { team, user } => Some((team.clone(), user.clone())),
            _ => None,
        }))
    }

    /// Decrypted payloads received by a connection.
    pub fn messages(&self, name: &str) -> Result<Vec<Vec<u8>>, WorldError> {
        Ok(self
            .events(name)?
            .iter()
            .filter_map(|event| match event {
                ConnectionEvent::Message(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect())
    }

    /// Number of events accepted by `matches`.
    pub fn count_events(&self, name: &str, matches: impl Fn(&SimEvent) -> bool) -> Result<usize, WorldError> {
        Ok(self.events(name)?.iter().filter(|event| matches(event)).count())
    }

    /// Whether every connection is connected.
    pub fn all_connected(&self) -> bool {
        self.peers.values().all(|peer| peer.connection.state() == ConnectionState::Connected)
    }

    /// Whether every connection is disconnected.
    pub fn all_disconnected(&self) -> bool {
        self.peers.values().all(|peer| peer.connection.state().is_terminal())
    }

    /// Frames handed to connections so far.
    pub fn frames_delivered(&self) -> usize {
        self.frames_delivered
    }

    /// Frames the network lost so far.
    pub fn frames_dropped(&self) -> usize {
        self.frames_dropped
    }

    /// Frames sent by a connection so far.
    pub fn frames_sent(&self, name: &str) -> Result<usize, WorldError> {
        self.peer(name).map(|peer| peer.sent)
    }

    /// Connection names.
    pub fn names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    fn peer(&self, name: &str) -> Result<&Peer, WorldError> {
        self.peers.get(name).ok_or_else(|| WorldError::UnknownConnection(name.to_owned()))
    }

    fn peer_mut(&mut self, name: &str) -> Result<&mut Peer, WorldError> {
        self.peers.get_mut(name).ok_or_else(|| WorldError::UnknownConnection(name.to_owned()))
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.network.reorder && self.in_flight.len() > 1 {
            let index = (self.env.next_u64() % self.in_flight.len() as u64) as usize;
            self.in_flight.remove(index)
        } else {
            self.in_flight.pop_front()
        }
    }

    fn deliver(&mut self, frame: Frame) -> Result<(), WorldError> {
        let Frame { to, bytes } = frame;
        let peer = self.peer_mut(&to)?;
        if !peer.connection.is_started() {
            trace!(to = %to, "holding frame until start");
            peer.pending.push(bytes);
            return Ok(());
        }

        let delivered = peer.connection.deliver(&bytes);
        self.frames_delivered += 1;
        match delivered {
            Ok(actions) => self.dispatch(&to, actions),
            // Stray bytes are the transport's problem, not the protocol's
            Err(ConnectionError::Decode(e)) => {
                debug!(to = %to, error = %e, "dropping undecodable frame");
                Ok(())
            },
            Err(source) => Err(WorldError::Connection { name: to, source }),
        }
    }

    fn dispatch(&mut self, from: &str, actions: Vec<ConnectionAction<MemoryTeam>>) -> Result<(), WorldError> {
        let mut updated = false;
        for action in actions {
            match action {
                ConnectionAction::Transmit(bytes) => self.transmit(from, bytes)?,
                ConnectionAction::Emit(event) => {
                    updated |= matches!(event, ConnectionEvent::Updated);
                    self.peer_mut(from)?.events.push(event);
                },
            }
        }

        if updated {
            self.propagate_update(from)?;
        }
        Ok(())
    }

    /// A sync changed `from`'s team copy; every other connection on that copy
    /// gets to sync it onward.
    fn propagate_update(&mut self, from: &str) -> Result<(), WorldError> {
        let Some(team) = self.peer(from)?.connection.team().cloned() else {
            return Ok(());
        };
        let others: Vec<String> = self
            .peers
            .iter()
            .filter(|(name, peer)| {
                name.as_str() != from && peer.connection.team().is_some_and(|t| t.same_copy(&team))
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in others {
            let actions = self.peer_mut(&name)?.connection.team_updated();
            self.dispatch(&name, actions)?;
        }
        Ok(())
    }

    fn transmit(&mut self, from: &str, bytes: Vec<u8>) -> Result<(), WorldError> {
        let peer = self.peer_mut(from)?;
        let nth = peer.sent;
        peer.sent += 1;
        let to = peer.remote.clone();

        let lost = DropFrame { from: from.to_owned(), nth };
        if self.network.drops.remove(&lost) {
            debug!(from, nth, "network dropped frame");
            self.frames_dropped += 1;
            return Ok(());
        }

        if self.network.duplicate {
            self.in_flight.push_back(Frame { to: to.clone(), bytes: bytes.clone() });
        }
        self.in_flight.push_back(Frame { to, bytes });
        Ok(())
    }
}
