//! Simulation drivers.
//!
//! A driver seeds the store, builds its two workers, spawns them on the
//! current tokio runtime, and hands back a [`SimulationHandle`]. Launching
//! never waits on the workers; callers poll the handle or `join` it.

use std::cmp::Reverse;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::events::{EventLog, WorkerEvent};
use super::gate::start_gate;
use super::result::{Protocol, SimulationResult};
use super::worker::{Outcome, Priority, Worker, WorkerReport, WorkerSpec, WorkerStatus};
use crate::config::SimulationConfig;
use crate::store::{RecordStore, StoreError};
use crate::time::{SimulationClock, TimeSource};
use crate::types::Record;

/// How a driver orders the start of its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StartOrder {
    /// Lower-priority workers wait until the highest-priority worker has
    /// read the record (and locked it, if it locks). Deterministic.
    #[default]
    Gated,
    /// Workers are only spawned in priority order. Best effort: on a
    /// multi-threaded runtime a later worker may still get ahead.
    PriorityHint,
}

impl FromStr for StartOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gated" => Ok(Self::Gated),
            "priority" | "priority_hint" => Ok(Self::PriorityHint),
            other => Err(format!("unknown start order '{other}' (expected 'gated' or 'priority')")),
        }
    }
}

/// Name of the first worker of every driver.
pub const FIRST_WORKER: &str = "Thread 0";
/// Name of the second worker of every driver.
pub const SECOND_WORKER: &str = "Thread 1";

/// Runs two lock-taking workers against one record.
///
/// The first worker holds the lock for the long delay; the second blocks on
/// the lock until the first commits, then runs its short delay and commits.
/// Both succeed and their commits are serialized.
#[derive(Debug, Clone)]
pub struct PessimisticDriver {
    store: Arc<RecordStore>,
    long_hold: Duration,
    short_hold: Duration,
    start_order: StartOrder,
}

impl PessimisticDriver {
    /// Create a driver with the default holds (10s, 3s) and gated start.
    #[must_use]
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self::from_config(store, &SimulationConfig::default())
    }

    /// Create a driver using the holds and start order from `config`.
    #[must_use]
    pub fn from_config(store: Arc<RecordStore>, config: &SimulationConfig) -> Self {
        Self {
            store,
            long_hold: config.pessimistic_long_hold,
            short_hold: config.pessimistic_short_hold,
            start_order: config.start_order,
        }
    }

    /// Override the two think-times.
    #[must_use]
    pub const fn with_holds(mut self, long_hold: Duration, short_hold: Duration) -> Self {
        self.long_hold = long_hold;
        self.short_hold = short_hold;
        self
    }

    /// Override the start order.
    #[must_use]
    pub const fn with_start_order(mut self, start_order: StartOrder) -> Self {
        self.start_order = start_order;
        self
    }

    /// The workers this driver launches for `seed`.
    #[must_use]
    pub fn worker_specs(&self, seed: &Record) -> Vec<WorkerSpec> {
        vec![
            WorkerSpec::pessimistic(FIRST_WORKER, seed.id.clone(), self.long_hold, Priority::High),
            WorkerSpec::pessimistic(SECOND_WORKER, seed.id.clone(), self.short_hold, Priority::Low),
        ]
    }

    /// Seed the store and spawn the workers without waiting for them.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, seed: Record) -> Result<SimulationHandle, StoreError> {
        tracing::debug!("START PESSIMISTIC SIMULATION");
        let specs = self.worker_specs(&seed);
        launch(Protocol::Pessimistic, &self.store, seed, specs, self.start_order)
    }

    /// Run the simulation to completion.
    pub async fn run(&self, seed: Record) -> Result<SimulationResult, StoreError> {
        Ok(self.start(seed)?.join().await)
    }
}

/// Runs two non-locking workers against one record.
///
/// Both read the same version. The short-delay worker commits first; the
/// long-delay worker then fails with a version conflict.
#[derive(Debug, Clone)]
pub struct OptimisticDriver {
    store: Arc<RecordStore>,
    long_hold: Duration,
    short_hold: Duration,
    start_order: StartOrder,
}

impl OptimisticDriver {
    /// Create a driver with the default holds (10s, 200ms) and gated start.
    #[must_use]
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self::from_config(store, &SimulationConfig::default())
    }

    /// Create a driver using the holds and start order from `config`.
    #[must_use]
    pub fn from_config(store: Arc<RecordStore>, config: &SimulationConfig) -> Self {
        Self {
            store,
            long_hold: config.optimistic_long_hold,
            short_hold: config.optimistic_short_hold,
            start_order: config.start_order,
        }
    }

    /// Override the two think-times. The first applies to the first worker.
    #[must_use]
    pub const fn with_holds(mut self, long_hold: Duration, short_hold: Duration) -> Self {
        self.long_hold = long_hold;
        self.short_hold = short_hold;
        self
    }

    /// Override the start order.
    #[must_use]
    pub const fn with_start_order(mut self, start_order: StartOrder) -> Self {
        self.start_order = start_order;
        self
    }

    /// The workers this driver launches for `seed`.
    #[must_use]
    pub fn worker_specs(&self, seed: &Record) -> Vec<WorkerSpec> {
        vec![
            WorkerSpec::optimistic(FIRST_WORKER, seed.id.clone(), self.long_hold, Priority::High),
            WorkerSpec::optimistic(SECOND_WORKER, seed.id.clone(), self.short_hold, Priority::Low),
        ]
    }

    /// Seed the store and spawn the workers without waiting for them.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, seed: Record) -> Result<SimulationHandle, StoreError> {
        tracing::debug!("START OPTIMISTIC SIMULATION");
        let specs = self.worker_specs(&seed);
        launch(Protocol::Optimistic, &self.store, seed, specs, self.start_order)
    }

    /// Run the simulation to completion.
    pub async fn run(&self, seed: Record) -> Result<SimulationResult, StoreError> {
        Ok(self.start(seed)?.join().await)
    }
}

/// Seed `store` and spawn one task per spec.
///
/// Workers are spawned highest priority first (stable for equal priority).
/// With [`StartOrder::Gated`] the first spawned worker opens a gate that all
/// the others wait on.
pub fn launch(
    protocol: Protocol,
    store: &Arc<RecordStore>,
    seed: Record,
    specs: Vec<WorkerSpec>,
    start_order: StartOrder,
) -> Result<SimulationHandle, StoreError> {
    store.seed(seed.clone())?;

    let events = EventLog::new(SimulationClock::start());

    let mut ordered: Vec<(usize, WorkerSpec)> = specs.into_iter().enumerate().collect();
    ordered.sort_by_key(|(_, spec)| Reverse(spec.priority));

    let (opener, waiter) = start_gate();
    let mut opener = Some(opener);

    let mut workers = Vec::with_capacity(ordered.len());
    for (index, spec) in ordered {
        let mut worker = Worker::new(spec.clone(), Arc::clone(store), events.clone());
        if start_order == StartOrder::Gated {
            worker = match opener.take() {
                Some(gate) => worker.opening(gate),
                None => worker.waiting_for(waiter.clone()),
            };
        }

        tracing::debug!(worker = %spec.name, priority = ?spec.priority, ?protocol, "spawning worker");
        let status = worker.status();
        let handle = tokio::spawn(worker.run());
        workers.push(LaunchedWorker {
            index,
            spec,
            status,
            handle,
        });
    }

    workers.sort_by_key(|worker| worker.index);

    Ok(SimulationHandle {
        protocol,
        seed,
        store: Arc::clone(store),
        events,
        workers,
    })
}

#[derive(Debug)]
struct LaunchedWorker {
    index: usize,
    spec: WorkerSpec,
    status: WorkerStatus,
    handle: JoinHandle<WorkerReport>,
}

/// A running simulation.
#[derive(Debug)]
pub struct SimulationHandle {
    protocol: Protocol,
    seed: Record,
    store: Arc<RecordStore>,
    events: EventLog,
    workers: Vec<LaunchedWorker>,
}

impl SimulationHandle {
    /// Whether every worker has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.workers.iter().all(|worker| worker.handle.is_finished())
    }

    /// Current outcome of each worker, in definition order.
    #[must_use]
    pub fn outcomes(&self) -> Vec<(String, Outcome)> {
        self.workers
            .iter()
            .map(|worker| (worker.spec.name.clone(), worker.status.get()))
            .collect()
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<WorkerEvent> {
        self.events.snapshot()
    }

    /// Wait for every worker and collect the results.
    ///
    /// A worker whose task panicked is reported as `Failed(Aborted)`; its
    /// unit of work was unwound, so any lock it held is already released.
    pub async fn join(self) -> SimulationResult {
        let clock = *self.events.clock();
        let (specs, handles): (Vec<WorkerSpec>, Vec<JoinHandle<WorkerReport>>) = self
            .workers
            .into_iter()
            .map(|worker| (worker.spec, worker.handle))
            .unzip();

        let joined = futures::future::join_all(handles).await;

        let reports = specs
            .iter()
            .zip(joined)
            .map(|(spec, joined)| match joined {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(worker = %spec.name, error = %e, "worker task died");
                    WorkerReport::aborted(spec, clock.now_ms())
                }
            })
            .collect();

        let final_record = match self.store.load(&self.seed.id) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::error!(record = %self.seed.id, error = %e, "could not read record after run");
                None
            }
        };

        SimulationResult {
            protocol: self.protocol,
            seed: self.seed,
            reports,
            events: self.events.snapshot(),
            final_record,
            elapsed_ms: clock.now_ms(),
        }
    }
}
