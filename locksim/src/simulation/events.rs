//! Structured worker events.
//!
//! Every worker phase transition is appended to an [`EventLog`] shared by
//! all workers of one simulation and mirrored as a `tracing` event.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::time::{SimulationClock, TimeSource};

/// A phase a worker reports when it reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The worker began executing.
    Started,
    /// The record was read.
    Loaded,
    /// The exclusive lock was granted (pessimistic workers only).
    Locked,
    /// The in-memory copy was changed.
    Mutated,
    /// The update was submitted for commit.
    CommitAttempted,
    /// Terminal: the commit succeeded.
    Committed,
    /// Terminal: the unit of work was rolled back.
    RolledBack,
}

impl Phase {
    /// Whether this phase ends the worker's run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// One recorded phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerEvent {
    /// Worker that reported the phase.
    pub worker_name: String,
    /// The phase reached.
    pub phase: Phase,
    /// Milliseconds since the simulation started.
    pub timestamp_ms: u64,
}

/// Append-only log of worker events, cheap to clone and share.
#[derive(Debug, Clone)]
pub struct EventLog {
    clock: SimulationClock,
    events: Arc<Mutex<Vec<WorkerEvent>>>,
}

impl EventLog {
    /// Create an empty log timestamped by `clock`.
    #[must_use]
    pub fn new(clock: SimulationClock) -> Self {
        Self {
            clock,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The clock used for timestamps.
    #[must_use]
    pub const fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    /// Record that `worker` reached `phase` now. Returns the timestamp.
    pub fn record(&self, worker: &str, phase: Phase) -> u64 {
        let timestamp_ms = self.clock.now_ms();
        tracing::debug!(worker, ?phase, t_ms = timestamp_ms, ">>> {worker}: {phase:?}");

        // Entries are only ever pushed, so a poisoned log is still consistent.
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(WorkerEvent {
                worker_name: worker.to_string(),
                phase,
                timestamp_ms,
            });
        timestamp_ms
    }

    /// Copy of every event recorded so far, in recording order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WorkerEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events of one worker, in recording order.
    #[must_use]
    pub fn for_worker(&self, worker: &str) -> Vec<WorkerEvent> {
        self.snapshot()
            .into_iter()
            .filter(|event| event.worker_name == worker)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_record_timestamps_and_order() {
        let log = EventLog::new(SimulationClock::start());

        assert_eq!(log.record("Thread 0", Phase::Started), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(log.record("Thread 1", Phase::Committed), 200);

        let events = log.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].worker_name, "Thread 0");
        assert_eq!(events[0].phase, Phase::Started);
        assert_eq!(events[1].timestamp_ms, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_entries() {
        let log = EventLog::new(SimulationClock::start());
        let other = log.clone();

        log.record("Thread 0", Phase::Loaded);
        other.record("Thread 1", Phase::Loaded);

        assert_eq!(log.snapshot().len(), 2);
        assert_eq!(other.for_worker("Thread 1").len(), 1);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::Committed.is_terminal());
        assert!(Phase::RolledBack.is_terminal());
        assert!(!Phase::Locked.is_terminal());
    }
}
