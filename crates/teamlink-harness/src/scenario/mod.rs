//! Scenario framework.
//!
//! A [`Scenario`] describes which connections exist and how the network
//! behaves; it cannot run until it has an oracle, so every scenario ends with
//! an explicit check of the final [`World`].

mod builder;
pub mod oracle;
mod world;

pub use builder::{RunnableScenario, Scenario};
pub use world::{DropFrame, NetworkConfig, SimConnection, SimEvent, World, WorldError};

/// Verification run against the final world.
pub type OracleFn = Box<dyn Fn(&World) -> Result<(), String>>;
