//! Deterministic simulation harness for Teamlink protocol testing.
//!
//! A seeded [`SimEnv`], a reference in-memory team ([`MemoryTeam`]), fixtures
//! for named identities, an in-memory lossy network with a scenario builder,
//! and a stream driver for running peers as turmoil hosts.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod net;
pub mod scenario;
pub mod sim_env;
pub mod team;

pub use net::StreamPeer;
pub use sim_env::SimEnv;
pub use team::{MemoryTeam, TeamError};
