//! The shared record store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::lock_table::LockTable;
use super::unit_of_work::{PendingWrite, UnitOfWork};
use super::StoreError;
use crate::types::{Record, RecordId};

/// Default maximum length of a record's `name`.
pub const DEFAULT_MAX_NAME_LENGTH: usize = 50;

/// In-memory store of versioned records.
///
/// # Invariants
///
/// - A stored record's `version` only changes through a committed update,
///   and then by exactly one.
/// - The writes of one commit become visible together or not at all.
#[derive(Debug)]
pub struct RecordStore {
    records: Mutex<HashMap<RecordId, Record>>,
    locks: LockTable,
    max_name_length: usize,
    lock_wait: Option<Duration>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    /// Create an empty store with the default name constraint and unbounded
    /// lock waits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            locks: LockTable::new(),
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            lock_wait: None,
        }
    }

    /// Set the maximum accepted `name` length.
    #[must_use]
    pub const fn with_max_name_length(mut self, max_name_length: usize) -> Self {
        self.max_name_length = max_name_length;
        self
    }

    /// Bound how long a lock request may wait. `None` waits forever.
    #[must_use]
    pub const fn with_lock_wait(mut self, lock_wait: Option<Duration>) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    /// Maximum accepted `name` length.
    #[must_use]
    pub const fn max_name_length(&self) -> usize {
        self.max_name_length
    }

    /// Configured lock wait bound.
    #[must_use]
    pub const fn lock_wait(&self) -> Option<Duration> {
        self.lock_wait
    }

    /// Put a record into the store as-is, replacing any existing one.
    ///
    /// Used to prepare a simulation; bypasses constraints and locks.
    pub fn seed(&self, record: Record) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;
        tracing::debug!(record = %record.id, version = record.version, "seeded record");
        records.insert(record.id.clone(), record);
        Ok(())
    }

    /// Read the current committed state of a record.
    pub fn load(&self, id: &RecordId) -> Result<Record, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Whether a record exists.
    pub fn contains(&self, id: &RecordId) -> Result<bool, StoreError> {
        Ok(self
            .records
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .contains_key(id))
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.lock().map_err(|_| StoreError::LockPoisoned)?.len())
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Insert a new record outside any unit of work (autocommit).
    ///
    /// Each call is its own commit: an earlier successful `save` stays
    /// visible even if a later one fails.
    pub fn save(&self, record: Record) -> Result<(), StoreError> {
        self.apply(&[PendingWrite::Insert(record)]).map(|_| ())
    }

    /// Open a unit of work on behalf of `owner`.
    #[must_use]
    pub fn begin(self: &Arc<Self>, owner: impl Into<String>) -> UnitOfWork {
        UnitOfWork::new(Arc::clone(self), owner.into())
    }

    /// Name of the unit of work currently holding the exclusive lock on `id`.
    #[must_use]
    pub fn lock_holder(&self, id: &RecordId) -> Option<String> {
        self.locks.holder(id)
    }

    pub(crate) const fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Validate the version of an update against the stored record without
    /// applying it.
    pub(crate) fn check_version(&self, record: &Record) -> Result<(), StoreError> {
        let stored = self.load(&record.id)?;
        if stored.version == record.version {
            Ok(())
        } else {
            Err(StoreError::VersionConflict {
                id: record.id.clone(),
                expected: record.version,
                actual: stored.version,
            })
        }
    }

    /// Validate and apply a batch of writes atomically.
    ///
    /// Every write is checked against the state as it would be after the
    /// writes before it; if any check fails nothing is applied. Returns the
    /// resulting version of every written record, in write order.
    pub(crate) fn apply(&self, writes: &[PendingWrite]) -> Result<Vec<(RecordId, u64)>, StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;

        let mut staged: HashMap<RecordId, Record> = HashMap::new();
        let mut versions = Vec::with_capacity(writes.len());

        for write in writes {
            let record = write.record();
            self.check_constraints(record)?;

            let current = staged.get(&record.id).or_else(|| records.get(&record.id));
            let next = match (write, current) {
                (PendingWrite::Insert(_), Some(_)) => {
                    return Err(StoreError::AlreadyExists(record.id.clone()));
                }
                (PendingWrite::Insert(_), None) => record.clone().with_version(0),
                (PendingWrite::Update(_), None) => {
                    return Err(StoreError::NotFound(record.id.clone()));
                }
                (PendingWrite::Update(_), Some(stored)) => {
                    if stored.version != record.version {
                        return Err(StoreError::VersionConflict {
                            id: record.id.clone(),
                            expected: record.version,
                            actual: stored.version,
                        });
                    }
                    record.clone().with_version(stored.version + 1)
                }
            };

            versions.push((next.id.clone(), next.version));
            staged.insert(next.id.clone(), next);
        }

        records.extend(staged);
        Ok(versions)
    }

    fn check_constraints(&self, record: &Record) -> Result<(), StoreError> {
        let length = record.name.chars().count();
        if length > self.max_name_length {
            return Err(StoreError::CommitFailure(format!(
                "name of record {} is {length} characters, limit is {}",
                record.id, self.max_name_length
            )));
        }
        Ok(())
    }
}
