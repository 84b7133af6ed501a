//! Simulated environment.
//!
//! Time is a manual clock advanced by the test, or turmoil's virtual clock
//! when a connection runs on a simulated host. Randomness is a ChaCha8 stream
//! from a fixed seed. Clones share both, so every connection in a world sees
//! the same clock and draws from one reproducible stream.

use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use teamlink_core::Environment;

#[derive(Debug)]
struct Shared {
    rng: ChaCha8Rng,
    elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clock {
    /// Moves on `advance` and on completed sleeps
    Manual,
    /// Follows turmoil's simulated elapsed time
    Turmoil,
}

/// Deterministic environment for simulations.
#[derive(Debug, Clone)]
pub struct SimEnv {
    epoch: Instant,
    clock: Clock,
    shared: Arc<Mutex<Shared>>,
}

impl SimEnv {
    /// Environment whose random stream is derived from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self::new(seed, Clock::Manual)
    }

    /// Environment for a turmoil host: `now` is the simulation's elapsed
    /// time, so sleeping inside the simulation moves it.
    pub fn on_turmoil(seed: u64) -> Self {
        Self::new(seed, Clock::Turmoil)
    }

    #[allow(clippy::disallowed_methods)]
    fn new(seed: u64, clock: Clock) -> Self {
        Self {
            epoch: Instant::now(),
            clock,
            shared: Arc::new(Mutex::new(Shared {
                rng: ChaCha8Rng::seed_from_u64(seed),
                elapsed: Duration::ZERO,
            })),
        }
    }

    /// Move the manual clock forward.
    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    /// Virtual time since the environment was created.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Next `u64` from the shared stream, for harness decisions.
    pub fn next_u64(&self) -> u64 {
        self.lock().rng.next_u64()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        match self.clock {
            Clock::Manual => self.epoch + self.elapsed(),
            Clock::Turmoil => self.epoch + turmoil::sim_elapsed().unwrap_or_default(),
        }
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        let env = self.clone();
        async move {
            tokio::time::sleep(duration).await;
            if env.clock == Clock::Manual {
                env.advance(duration);
            }
        }
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);
        let (mut x, mut y) = ([0u8; 16], [0u8; 16]);
        a.random_bytes(&mut x);
        b.random_bytes(&mut y);
        assert_eq!(x, y);
    }

    #[test]
    fn clones_share_the_clock() {
        let env = SimEnv::with_seed(1);
        let clone = env.clone();
        let start = env.now();
        clone.advance(Duration::from_secs(3));
        assert_eq!(env.now() - start, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_sleep_moves_the_manual_clock() {
        let env = SimEnv::with_seed(1);
        let start = env.now();
        env.sleep(Duration::from_secs(2)).await;
        assert_eq!(env.now() - start, Duration::from_secs(2));
    }
}
