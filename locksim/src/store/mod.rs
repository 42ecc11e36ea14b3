//! In-memory record store with row locks and units of work.
//!
//! The store is the only shared mutable resource in a simulation. Workers
//! never touch it directly; they open a [`UnitOfWork`], read through it,
//! optionally lock rows, buffer writes, and commit.
//!
//! # Usage
//!
//! ```ignore
//! let store = Arc::new(RecordStore::new());
//! store.seed(Record::new("321", "X"))?;
//!
//! let mut uow = store.begin("Thread 0");
//! let mut record = uow.lock(&"321".into(), LockMode::Exclusive).await?;
//! record.name = "Thread 0".to_string();
//! uow.update(record)?;
//! uow.commit().await?; // releases the lock
//! ```

mod error;
mod lock_table;
mod record_store;
mod unit_of_work;

pub use error::StoreError;
pub use lock_table::{LockMode, LockTable, RecordLock};
pub use record_store::{DEFAULT_MAX_NAME_LENGTH, RecordStore};
pub use unit_of_work::{CommitReceipt, UnitOfWork};
