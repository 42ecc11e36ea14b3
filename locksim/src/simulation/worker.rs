//! The unit of concurrent execution.
//!
//! A worker reads one record, optionally locks it, waits for its think-time,
//! changes `name`, and commits, all inside one unit of work. Its outcome is
//! settled exactly once, when the run ends.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use super::events::{EventLog, Phase};
use super::gate::{GateOpener, GateWaiter};
use super::{optimistic, pessimistic};
use crate::store::{RecordStore, StoreError};
use crate::types::RecordId;

/// Scheduling priority hint.
///
/// Drivers spawn `High` workers before `Low` ones. That is a hint, not a
/// guarantee; use a start gate where order matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Scheduled after `High` workers.
    Low,
    /// Scheduled first.
    High,
}

/// Why a worker failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The record did not exist.
    NotFound,
    /// The worker's snapshot was stale when it tried to commit.
    VersionConflict,
    /// The bounded lock wait elapsed.
    LockTimeout,
    /// The commit was rejected (constraint violation or store failure).
    CommitFailure,
    /// The worker task panicked or was cancelled.
    Aborted,
}

impl From<&StoreError> for FailureReason {
    fn from(error: &StoreError) -> Self {
        match error {
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::VersionConflict { .. } => Self::VersionConflict,
            StoreError::LockTimeout { .. } => Self::LockTimeout,
            StoreError::AlreadyExists(_)
            | StoreError::CommitFailure(_)
            | StoreError::LockPoisoned => Self::CommitFailure,
        }
    }
}

/// A worker's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    /// Not finished yet.
    Pending,
    /// Committed.
    Success,
    /// Rolled back.
    Failed(FailureReason),
}

impl Outcome {
    /// Whether the worker committed.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// The failure reason, if the worker failed.
    #[must_use]
    pub const fn failure(self) -> Option<FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason),
            Self::Pending | Self::Success => None,
        }
    }
}

/// Shared view of a worker's outcome, readable while the worker runs.
///
/// # Invariants
///
/// - Moves from `Pending` to a terminal outcome at most once.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    outcome: Arc<Mutex<Outcome>>,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            outcome: Arc::new(Mutex::new(Outcome::Pending)),
        }
    }
}

impl WorkerStatus {
    /// Current outcome.
    #[must_use]
    pub fn get(&self) -> Outcome {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settle the outcome. Returns false (and changes nothing) if it was
    /// already settled.
    pub(crate) fn settle(&self, outcome: Outcome) -> bool {
        let mut current = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != Outcome::Pending {
            return false;
        }
        *current = outcome;
        true
    }
}

/// Parameters of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Worker name, also used as the unit-of-work owner.
    pub name: String,
    /// The record to update.
    pub record_id: RecordId,
    /// Think-time between reading and writing.
    pub delay: Duration,
    /// Start-order hint.
    pub priority: Priority,
    /// Whether the worker takes an Exclusive lock (pessimistic protocol).
    pub uses_explicit_lock: bool,
    /// The value the worker writes into `name`.
    pub written_name: String,
}

impl WorkerSpec {
    /// A worker that locks the record and writes its own name into it.
    #[must_use]
    pub fn pessimistic(
        name: impl Into<String>,
        record_id: RecordId,
        delay: Duration,
        priority: Priority,
    ) -> Self {
        let name = name.into();
        Self {
            written_name: name.clone(),
            name,
            record_id,
            delay,
            priority,
            uses_explicit_lock: true,
        }
    }

    /// A worker that relies on the version check and writes `mk <name>`.
    #[must_use]
    pub fn optimistic(
        name: impl Into<String>,
        record_id: RecordId,
        delay: Duration,
        priority: Priority,
    ) -> Self {
        let name = name.into();
        Self {
            written_name: format!("mk {name}"),
            name,
            record_id,
            delay,
            priority,
            uses_explicit_lock: false,
        }
    }

    /// Override the value written into `name`.
    #[must_use]
    pub fn with_written_name(mut self, written_name: impl Into<String>) -> Self {
        self.written_name = written_name.into();
        self
    }
}

/// Everything observable about a finished worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Worker name.
    pub name: String,
    /// Start-order hint it ran with.
    pub priority: Priority,
    /// Whether it used the pessimistic protocol.
    pub uses_explicit_lock: bool,
    /// Think-time in milliseconds.
    pub delay_ms: u64,
    /// Terminal outcome.
    pub outcome: Outcome,
    /// When it started, ms since the simulation began.
    pub started_at_ms: u64,
    /// When it reached its outcome, ms since the simulation began.
    pub finished_at_ms: u64,
    /// Version of the record when first read.
    pub snapshot_version: Option<u64>,
    /// Version its commit produced.
    pub committed_version: Option<u64>,
    /// Value it tried to write.
    pub written_name: String,
}

impl WorkerReport {
    /// Time from start to outcome.
    #[must_use]
    pub const fn elapsed_ms(&self) -> u64 {
        self.finished_at_ms.saturating_sub(self.started_at_ms)
    }

    /// Report for a worker whose task died before producing one.
    pub(crate) fn aborted(spec: &WorkerSpec, at_ms: u64) -> Self {
        Self {
            name: spec.name.clone(),
            priority: spec.priority,
            uses_explicit_lock: spec.uses_explicit_lock,
            delay_ms: duration_ms(spec.delay),
            outcome: Outcome::Failed(FailureReason::Aborted),
            started_at_ms: at_ms,
            finished_at_ms: at_ms,
            snapshot_version: None,
            committed_version: None,
            written_name: spec.written_name.clone(),
        }
    }
}

/// A worker ready to run against a store.
#[derive(Debug)]
pub struct Worker {
    spec: WorkerSpec,
    store: Arc<RecordStore>,
    events: EventLog,
    status: WorkerStatus,
    opens: Option<GateOpener>,
    waits_for: Option<GateWaiter>,
    snapshot_version: Option<u64>,
}

impl Worker {
    /// Create a worker.
    #[must_use]
    pub fn new(spec: WorkerSpec, store: Arc<RecordStore>, events: EventLog) -> Self {
        Self {
            spec,
            store,
            events,
            status: WorkerStatus::default(),
            opens: None,
            waits_for: None,
            snapshot_version: None,
        }
    }

    /// Have this worker open `gate` once it has secured its read (and lock,
    /// if it takes one).
    #[must_use]
    pub fn opening(mut self, gate: GateOpener) -> Self {
        self.opens = Some(gate);
        self
    }

    /// Hold this worker back until `gate` opens.
    #[must_use]
    pub fn waiting_for(mut self, gate: GateWaiter) -> Self {
        self.waits_for = Some(gate);
        self
    }

    /// The worker's parameters.
    #[must_use]
    pub const fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    /// A handle on the worker's outcome that stays valid after `run` takes
    /// the worker.
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.status.clone()
    }

    pub(super) const fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub(super) fn record(&self, phase: Phase) -> u64 {
        self.events.record(&self.spec.name, phase)
    }

    pub(super) fn open_gate(&mut self) {
        if let Some(gate) = self.opens.take() {
            gate.open();
        }
    }

    pub(super) const fn note_snapshot(&mut self, version: u64) {
        if self.snapshot_version.is_none() {
            self.snapshot_version = Some(version);
        }
    }

    /// Execute the worker's protocol to completion.
    ///
    /// Never fails: every error is turned into a `Failed` outcome and the
    /// unit of work is rolled back (releasing any lock) before this returns.
    pub async fn run(mut self) -> WorkerReport {
        if let Some(gate) = self.waits_for.take() {
            gate.wait().await;
        }

        let started_at_ms = self.record(Phase::Started);

        let result = if self.spec.uses_explicit_lock {
            pessimistic::execute(&mut self).await
        } else {
            optimistic::execute(&mut self).await
        };

        // A worker that failed early must not strand the ones behind it.
        self.open_gate();

        let (outcome, committed_version, phase) = match result {
            Ok(receipt) => (
                Outcome::Success,
                receipt.version_of(&self.spec.record_id),
                Phase::Committed,
            ),
            Err(e) => {
                tracing::warn!(worker = %self.spec.name, error = %e, "worker rolled back");
                (
                    Outcome::Failed(FailureReason::from(&e)),
                    None,
                    Phase::RolledBack,
                )
            }
        };

        let finished_at_ms = self.record(phase);
        self.status.settle(outcome);

        tracing::info!(
            worker = %self.spec.name,
            ?outcome,
            elapsed_ms = finished_at_ms.saturating_sub(started_at_ms),
            ">>> finish {}",
            self.spec.name
        );

        WorkerReport {
            delay_ms: duration_ms(self.spec.delay),
            priority: self.spec.priority,
            uses_explicit_lock: self.spec.uses_explicit_lock,
            outcome,
            started_at_ms,
            finished_at_ms,
            snapshot_version: self.snapshot_version,
            committed_version,
            written_name: self.spec.written_name,
            name: self.spec.name,
        }
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::gate::start_gate;
    use crate::time::SimulationClock;
    use crate::types::Record;

    fn seeded_store(id: &str, name: &str) -> Arc<RecordStore> {
        let store = Arc::new(RecordStore::new());
        store.seed(Record::new(id, name)).unwrap();
        store
    }

    #[test]
    fn test_failure_reason_mapping() {
        let id = RecordId::new("1");
        assert_eq!(
            FailureReason::from(&StoreError::NotFound(id.clone())),
            FailureReason::NotFound
        );
        assert_eq!(
            FailureReason::from(&StoreError::VersionConflict {
                id: id.clone(),
                expected: 0,
                actual: 1
            }),
            FailureReason::VersionConflict
        );
        assert_eq!(
            FailureReason::from(&StoreError::LockTimeout { id, waited_ms: 1 }),
            FailureReason::LockTimeout
        );
        assert_eq!(
            FailureReason::from(&StoreError::CommitFailure("too long".to_string())),
            FailureReason::CommitFailure
        );
    }

    #[test]
    fn test_status_settles_once() {
        let status = WorkerStatus::default();
        assert_eq!(status.get(), Outcome::Pending);
        assert!(status.settle(Outcome::Success));
        assert!(!status.settle(Outcome::Failed(FailureReason::Aborted)));
        assert_eq!(status.get(), Outcome::Success);
    }

    #[test]
    fn test_spec_written_names() {
        let id = RecordId::new("1");
        let p = WorkerSpec::pessimistic("Thread 0", id.clone(), Duration::ZERO, Priority::High);
        let o = WorkerSpec::optimistic("Thread 1", id, Duration::ZERO, Priority::Low);
        assert_eq!(p.written_name, "Thread 0");
        assert!(p.uses_explicit_lock);
        assert_eq!(o.written_name, "mk Thread 1");
        assert!(!o.uses_explicit_lock);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pessimistic_worker_commits() {
        let store = seeded_store("321", "X");
        let events = EventLog::new(SimulationClock::start());
        let spec = WorkerSpec::pessimistic(
            "Thread 0",
            RecordId::new("321"),
            Duration::from_millis(10_000),
            Priority::High,
        );

        let worker = Worker::new(spec, Arc::clone(&store), events.clone());
        let status = worker.status();
        let report = worker.run().await;

        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(status.get(), Outcome::Success);
        assert_eq!(report.started_at_ms, 0);
        assert_eq!(report.finished_at_ms, 10_000);
        assert_eq!(report.snapshot_version, Some(0));
        assert_eq!(report.committed_version, Some(1));
        assert_eq!(store.load(&RecordId::new("321")).unwrap().name, "Thread 0");

        let phases: Vec<Phase> = events.snapshot().iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![
                Phase::Started,
                Phase::Loaded,
                Phase::Locked,
                Phase::Mutated,
                Phase::CommitAttempted,
                Phase::Committed,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimistic_worker_has_no_locked_phase() {
        let store = seeded_store("123", "Y");
        let events = EventLog::new(SimulationClock::start());
        let spec = WorkerSpec::optimistic(
            "Thread 1",
            RecordId::new("123"),
            Duration::from_millis(200),
            Priority::Low,
        );

        let report = Worker::new(spec, Arc::clone(&store), events.clone())
            .run()
            .await;

        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.finished_at_ms, 200);
        assert_eq!(store.load(&RecordId::new("123")).unwrap().name, "mk Thread 1");
        assert!(events.snapshot().iter().all(|e| e.phase != Phase::Locked));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_record_fails_and_opens_gate() {
        let store = Arc::new(RecordStore::new());
        let events = EventLog::new(SimulationClock::start());
        let (opener, waiter) = start_gate();
        let spec = WorkerSpec::pessimistic(
            "Thread 0",
            RecordId::new("321"),
            Duration::from_millis(10_000),
            Priority::High,
        );

        let report = Worker::new(spec, store, events.clone())
            .opening(opener)
            .run()
            .await;

        assert_eq!(report.outcome, Outcome::Failed(FailureReason::NotFound));
        assert_eq!(report.elapsed_ms(), 0);
        assert!(waiter.is_open());
        assert_eq!(
            events.snapshot().last().map(|e| e.phase),
            Some(Phase::RolledBack)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_name_fails_commit() {
        let store = seeded_store("321", "X");
        let events = EventLog::new(SimulationClock::start());
        let spec = WorkerSpec::pessimistic(
            "Thread 0",
            RecordId::new("321"),
            Duration::from_millis(100),
            Priority::High,
        )
        .with_written_name("x".repeat(100));

        let report = Worker::new(spec, Arc::clone(&store), events).run().await;

        assert_eq!(report.outcome, Outcome::Failed(FailureReason::CommitFailure));
        assert_eq!(store.load(&RecordId::new("321")).unwrap().name, "X");
        assert_eq!(store.lock_holder(&RecordId::new("321")), None);
    }
}
