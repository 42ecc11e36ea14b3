//! Aggregate results of one simulation run.

use serde::Serialize;

use super::events::{Phase, WorkerEvent};
use super::worker::{Outcome, WorkerReport};
use crate::types::{Record, RecordId};

/// Which concurrency-control discipline a run exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Exclusive row lock held across the think-time.
    Pessimistic,
    /// Version check at commit, no lock.
    Optimistic,
}

/// The span during which one worker held the exclusive lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInterval {
    /// The holder.
    pub worker: String,
    /// When the lock was granted.
    pub acquired_ms: u64,
    /// When the holder's unit of work ended.
    pub released_ms: u64,
}

impl LockInterval {
    /// Whether two intervals share any instant beyond a common endpoint.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.acquired_ms < other.released_ms && other.acquired_ms < self.released_ms
    }
}

/// Results of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    /// The protocol the workers used.
    pub protocol: Protocol,
    /// The record as seeded before the run.
    pub seed: Record,
    /// One report per worker, in the order the driver defined them.
    pub reports: Vec<WorkerReport>,
    /// Every worker event, in recording order.
    pub events: Vec<WorkerEvent>,
    /// The stored record after every worker finished.
    pub final_record: Option<Record>,
    /// Time from launch until the last worker finished.
    pub elapsed_ms: u64,
}

impl SimulationResult {
    /// The contended record.
    #[must_use]
    pub const fn record_id(&self) -> &RecordId {
        &self.seed.id
    }

    /// Report of the named worker.
    #[must_use]
    pub fn report(&self, name: &str) -> Option<&WorkerReport> {
        self.reports.iter().find(|report| report.name == name)
    }

    /// Number of workers that committed.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| report.outcome.is_success())
            .count()
    }

    /// Number of workers that failed.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| matches!(report.outcome, Outcome::Failed(_)))
            .count()
    }

    /// Names of workers that reached `phase`, in the order they reached it.
    #[must_use]
    pub fn order_of(&self, phase: Phase) -> Vec<&str> {
        self.events
            .iter()
            .filter(|event| event.phase == phase)
            .map(|event| event.worker_name.as_str())
            .collect()
    }

    /// Names of committed workers in commit order.
    #[must_use]
    pub fn commit_order(&self) -> Vec<&str> {
        self.order_of(Phase::Committed)
    }

    /// Names of workers in the order they were granted the lock.
    #[must_use]
    pub fn lock_order(&self) -> Vec<&str> {
        self.order_of(Phase::Locked)
    }

    /// The worker whose commit landed last.
    #[must_use]
    pub fn last_committer(&self) -> Option<&WorkerReport> {
        self.commit_order()
            .last()
            .and_then(|name| self.report(name))
    }

    /// Lock-holding spans derived from the event log.
    ///
    /// A span runs from a worker's `Locked` event to its terminal event. A
    /// holder that never reached a terminal event is treated as holding the
    /// lock until the end of the run.
    #[must_use]
    pub fn lock_intervals(&self) -> Vec<LockInterval> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, event)| event.phase == Phase::Locked)
            .map(|(index, locked)| {
                let released_ms = self.events[index..]
                    .iter()
                    .find(|event| {
                        event.worker_name == locked.worker_name && event.phase.is_terminal()
                    })
                    .map_or(self.elapsed_ms, |event| event.timestamp_ms);
                LockInterval {
                    worker: locked.worker_name.clone(),
                    acquired_ms: locked.timestamp_ms,
                    released_ms,
                }
            })
            .collect()
    }
}
