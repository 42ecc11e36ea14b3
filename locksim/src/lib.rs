// Life of a simulation:
// 1. Seed one record into a fresh store
// 2. Spawn the workers; the first one opens the start gate
// 3. Each worker runs its protocol inside one unit of work:
//     - Pessimistic: load, lock, hold, write, commit
//     - Optimistic: load, hold, write, commit (version-checked)
// 4. Join the workers, read the record back, check invariants
//
// System components:
//  - Record store with a per-record lock table
//  - Units of work that buffer writes and commit atomically
//  - Drivers, workers and the event log

pub mod config;
pub mod simulation;
pub mod store;
pub mod time;
pub mod types;
