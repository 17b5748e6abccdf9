//! Simulated environment with a virtual clock and seeded RNG.
//!
//! Time only moves when a test calls [`SimEnv::advance`] or when the sweeper
//! sleeps. Every clone shares the same clock and RNG stream, so two peers
//! built from one `SimEnv` observe a single timeline and the whole run is
//! reproducible from the seed.

use std::{ops::Sub, sync::Arc, time::Duration};

use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sealtag_core::Environment;

/// Point on the virtual timeline, measured from simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since simulation start.
    pub fn since_start(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// Deterministic environment.
#[derive(Clone)]
pub struct SimEnv {
    seed: u64,
    clock: Arc<Mutex<Duration>>,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Environment at time zero with an RNG seeded from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            clock: Arc::new(Mutex::new(Duration::ZERO)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
        }
    }

    /// Seed this environment was built from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        *self.clock.lock() += by;
        tracing::trace!(by_ms = by.as_millis(), "virtual clock advanced");
    }

    /// Time since simulation start.
    pub fn elapsed(&self) -> Duration {
        *self.clock.lock()
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv")
            .field("seed", &self.seed)
            .field("elapsed", &self.elapsed())
            .finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(*self.clock.lock())
    }

    /// Advances virtual time by `duration`, then yields once so other tasks
    /// observe the new time.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        tokio::task::yield_now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().fill_bytes(buffer);
    }
}
