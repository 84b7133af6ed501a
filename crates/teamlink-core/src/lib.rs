//! Teamlink connection protocol core.
//!
//! Pure state machine logic for authenticating two team peers, negotiating a
//! session key and keeping their authorization histories in sync, completely
//! decoupled from I/O.
//!
//! # Architecture
//!
//! The protocol is a deterministic state machine isolated from I/O, time,
//! randomness and scheduling. Time and randomness come from an
//! [`env::Environment`]; the authorization history is reached through the
//! [`team::Team`] trait. Every call returns declarative
//! [`connection::ConnectionAction`]s (bytes to transmit, events for the
//! application) rather than performing them.
//!
//! # Components
//!
//! - [`connection`]: Orchestrator owning the machine and the queue
//! - [`machine`]: Authentication, negotiation and sync state machine
//! - [`queue`]: In-order, resend-capable delivery over an unreliable link
//! - [`context`]: Per-connection context and identity predicates
//! - [`identity`]: Signature challenges
//! - [`negotiation`]: Session seed exchange
//! - [`team`]: Authorization-history collaborator trait
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`error`]: Connection error types

pub mod connection;
pub mod context;
pub mod env;
pub mod error;
pub mod identity;
pub mod machine;
pub mod negotiation;
pub mod queue;
pub mod team;

pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionEvent};
pub use context::{ConnectionContext, Context, Role};
pub use env::{Environment, SystemEnv};
pub use error::ConnectionError;
pub use machine::{AuthenticatingState, ConnectionState, ProvingState, VerifyingState};
pub use queue::{MessageQueue, QueueEvent};
pub use team::Team;
