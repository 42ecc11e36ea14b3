//! Row-level lock table.
//!
//! Each record id maps to an async mutex. Holding the returned [`RecordLock`]
//! is holding the Exclusive lock; dropping it releases the lock, so a unit of
//! work that ends for any reason (commit, rollback, error, panic unwind) frees
//! its rows.
//!
//! # Fairness
//!
//! Waiters on the same id are granted the lock in the order they asked for it
//! (tokio's `Mutex` is FIFO). Which worker asks first is only as ordered as the
//! caller makes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::StoreError;
use crate::types::RecordId;

/// Lock mode requested for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// No lock; the record is read as-is.
    None,
    /// Exclusive lock; at most one holder per record id.
    Exclusive,
}

type Holders = Arc<Mutex<HashMap<RecordId, String>>>;

/// Table of per-record exclusive locks.
#[derive(Debug, Default)]
pub struct LockTable {
    slots: Mutex<HashMap<RecordId, Arc<AsyncMutex<()>>>>,
    holders: Holders,
}

impl LockTable {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive lock on `id` for `owner`.
    ///
    /// Suspends the caller until no other holder exists. With `wait` set,
    /// gives up after that long and returns [`StoreError::LockTimeout`].
    ///
    /// The lock is not re-entrant: an owner that already holds `id` and asks
    /// again waits on itself. [`UnitOfWork`](super::UnitOfWork) tracks what
    /// it holds to avoid that.
    pub async fn acquire(
        &self,
        id: &RecordId,
        owner: &str,
        wait: Option<Duration>,
    ) -> Result<RecordLock, StoreError> {
        let slot = self.slot(id)?;

        let guard = match wait {
            Some(limit) => tokio::time::timeout(limit, slot.lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout {
                    id: id.clone(),
                    waited_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })?,
            None => slot.lock_owned().await,
        };

        self.holders
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(id.clone(), owner.to_string());

        tracing::trace!(record = %id, owner, "exclusive lock granted");

        Ok(RecordLock {
            id: id.clone(),
            holders: Arc::clone(&self.holders),
            _guard: guard,
        })
    }

    /// Name of the current holder of `id`, if any.
    #[must_use]
    pub fn holder(&self, id: &RecordId) -> Option<String> {
        self.holders.lock().ok()?.get(id).cloned()
    }

    fn slot(&self, id: &RecordId) -> Result<Arc<AsyncMutex<()>>, StoreError> {
        let mut slots = self.slots.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(Arc::clone(
            slots
                .entry(id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        ))
    }
}

/// A granted exclusive lock. Released on drop.
#[derive(Debug)]
pub struct RecordLock {
    id: RecordId,
    holders: Holders,
    // Freed after `Drop::drop` has cleared the holder entry.
    _guard: OwnedMutexGuard<()>,
}

impl RecordLock {
    /// The locked record id.
    #[must_use]
    pub const fn id(&self) -> &RecordId {
        &self.id
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Ok(mut holders) = self.holders.lock() {
            holders.remove(&self.id);
        }
        tracing::trace!(record = %self.id, "exclusive lock released");
    }
}
