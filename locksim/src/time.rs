//! Time source for simulations.
//!
//! Simulation timestamps are milliseconds since the simulation started.
//! They are read from tokio's clock, so a runtime with paused time (as in the
//! test suite) produces exact, reproducible timestamps while production runs
//! see wall-clock progress.

use tokio::time::Instant;

/// Abstraction over the simulation clock.
pub trait TimeSource {
    /// Milliseconds elapsed since the simulation began.
    fn now_ms(&self) -> u64;
}

/// Clock anchored at the moment a simulation started.
#[derive(Debug, Clone, Copy)]
pub struct SimulationClock {
    origin: Instant,
}

impl SimulationClock {
    /// Start a clock at the current tokio instant.
    #[must_use]
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// The instant this clock reads as zero.
    #[must_use]
    pub const fn origin(&self) -> Instant {
        self.origin
    }
}

impl TimeSource for SimulationClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
