//! Clock and entropy seam.
//!
//! Decouples coin lifecycle logic from system resources (time, randomness).
//! Production code runs on [`SystemEnv`]; tests drive the wall clock by hand
//! through [`ManualEnv`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

/// Where the coin lifecycle gets time, pauses and nonces from.
///
/// Production `random_bytes()` must draw from a CSPRNG, since packet nonces
/// come from it.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Seconds since the Unix epoch. Used for mint seeds, publish stamps and
    /// contact idle tracking.
    fn wall_clock_secs(&self) -> u64;

    /// Pause between activity iterations. Only the client runtime awaits
    /// this; core logic never sleeps.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with entropy.
    fn random_bytes(&self, buffer: &mut [u8]);
}

/// OS clock, tokio timers and `getrandom`.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. A process without functioning
/// randomness must not keep minting nonces.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// The process environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn wall_clock_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used, reason = "no usable entropy means no safe nonces")]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

/// Environment with a hand-driven wall clock.
///
/// Clones share the clock. Randomness still comes from the OS so nonces stay
/// unique across runs.
#[derive(Debug, Clone)]
pub struct ManualEnv {
    clock: Arc<AtomicU64>,
}

impl ManualEnv {
    /// Start the clock at `secs` since the Unix epoch.
    #[must_use]
    pub fn starting_at(secs: u64) -> Self {
        Self { clock: Arc::new(AtomicU64::new(secs)) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.fetch_add(by.as_secs(), Ordering::SeqCst);
    }

    /// Set the clock. Values behind the current time are ignored.
    pub fn set(&self, secs: u64) {
        self.clock.fetch_max(secs, Ordering::SeqCst);
    }
}

impl Environment for ManualEnv {
    fn wall_clock_secs(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used, reason = "no usable entropy means no safe nonces")]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
