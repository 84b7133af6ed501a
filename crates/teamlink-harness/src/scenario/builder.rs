//! Scenario builder API.
//!
//! Provides a declarative API for constructing scenario tests that enforce
//! the Oracle Pattern.

use std::time::Duration;

use teamlink_core::{ConnectionConfig, Context};

use crate::{
    scenario::{NetworkConfig, OracleFn, World},
    team::MemoryTeam,
};

struct Pair {
    a: String,
    a_context: Context<MemoryTeam>,
    b: String,
    b_context: Context<MemoryTeam>,
}

/// Scenario builder.
///
/// Add connection pairs and network behaviour, then call `.oracle()` to get a
/// [`RunnableScenario`].
pub struct Scenario {
    name: String,
    seed: u64,
    network: NetworkConfig,
    config: ConnectionConfig,
    pairs: Vec<Pair>,
}

impl Scenario {
    /// Create a new scenario with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: 0,
            network: NetworkConfig::reliable(),
            config: ConnectionConfig::default(),
            pairs: Vec::new(),
        }
    }

    /// Seed for the world's randomness.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Network behaviour.
    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// Wait-state timeout for every connection.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = ConnectionConfig { timeout };
        self
    }

    /// Add two connections wired to each other.
    pub fn connect(
        mut self,
        a: impl Into<String>,
        a_context: Context<MemoryTeam>,
        b: impl Into<String>,
        b_context: Context<MemoryTeam>,
    ) -> Self {
        self.pairs.push(Pair { a: a.into(), a_context, b: b.into(), b_context });
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario.
    ///
    /// Starts every connection, carries frames until the network is quiet,
    /// then runs the oracle. Returns the final world for further checks.
    pub fn run(self) -> Result<World, String> {
        let Scenario { name, seed, network, config, pairs } = self.scenario;
        if pairs.is_empty() {
            return Err(format!("Scenario '{name}': no connections"));
        }

        let mut world = World::with_network(seed, network);
        world.set_connection_config(config);
        for Pair { a, a_context, b, b_context } in pairs {
            world
                .connect(&a, a_context, &b, b_context)
                .map_err(|e| format!("Scenario '{name}': {e}"))?;
        }

        world.start_and_run().map_err(|e| format!("Scenario '{name}': {e}"))?;
        (self.oracle)(&world).map_err(|e| format!("Scenario '{name}': {e}"))?;
        Ok(world)
    }
}
