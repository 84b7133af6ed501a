//! Environment abstraction.
//!
//! The protocol never reads the clock or an RNG directly. Production uses
//! [`SystemEnv`]; simulations supply a virtual clock and a seeded RNG so runs
//! are reproducible.

use std::{
    future::Future,
    time::{Duration, Instant},
};

/// Source of time and randomness for a connection.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current time.
    fn now(&self) -> Instant;

    /// Sleep for `duration` (virtual time in simulation).
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `buffer` with cryptographically secure random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);
}

/// Fixed-size random array drawn from `env`.
pub fn random_array<E: Environment, const N: usize>(env: &E) -> [u8; N] {
    let mut bytes = [0u8; N];
    env.random_bytes(&mut bytes);
    bytes
}

/// Wall clock, tokio timers and OS randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}
