//! Concurrency-control simulation.
//!
//! Runs workers against a shared [`RecordStore`](crate::store::RecordStore)
//! under one of two protocols and records what happened:
//! - Pessimistic: each worker takes the Exclusive lock before writing, so
//!   commits are serialized and every worker succeeds
//! - Optimistic: no locks; the version check lets the first commit win and
//!   fails the rest with a version conflict
//!
//! # Design Principles
//!
//! 1. Time comes from the tokio clock, so a paused runtime makes runs exact
//! 2. Start order is enforced with a gate, not inferred from priorities
//! 3. Locks belong to a unit of work and are released on every exit path
//! 4. Results are checked by an [`InvariantChecker`] after each run
//!
//! # Usage
//!
//! ```ignore
//! use locksim::simulation::{InvariantChecker, PessimisticDriver};
//!
//! let store = Arc::new(RecordStore::new());
//! let result = PessimisticDriver::new(store)
//!     .run(Record::new("321", "X"))
//!     .await?;
//!
//! let mut checker = InvariantChecker::new();
//! checker.check(&result);
//! assert!(checker.passed());
//! ```

mod driver;
mod events;
mod gate;
mod invariants;
mod optimistic;
mod pessimistic;
mod result;
mod transaction;
mod worker;

pub use driver::{
    FIRST_WORKER, OptimisticDriver, PessimisticDriver, SECOND_WORKER, SimulationHandle, StartOrder,
    launch,
};
pub use events::{EventLog, Phase, WorkerEvent};
pub use gate::{GateOpener, GateWaiter, start_gate};
pub use invariants::{InvariantChecker, InvariantViolation};
pub use result::{LockInterval, Protocol, SimulationResult};
pub use transaction::{TransactionDriver, TransactionReport, WriteMode};
pub use worker::{
    FailureReason, Outcome, Priority, Worker, WorkerReport, WorkerSpec, WorkerStatus,
};
