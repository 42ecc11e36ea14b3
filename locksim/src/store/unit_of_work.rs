//! Unit of work (transaction) over the record store.
//!
//! A unit of work buffers its writes and applies them in one atomic step at
//! commit. Row locks it takes are held until it ends. It ends exactly once:
//! `commit` and `rollback` both consume it, and simply dropping it is a
//! rollback.

use std::sync::Arc;

use super::lock_table::{LockMode, RecordLock};
use super::record_store::RecordStore;
use super::StoreError;
use crate::types::{Record, RecordId};

/// A buffered write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingWrite {
    Insert(Record),
    Update(Record),
}

impl PendingWrite {
    pub(crate) const fn record(&self) -> &Record {
        match self {
            Self::Insert(record) | Self::Update(record) => record,
        }
    }

    fn replace(&mut self, record: Record) {
        match self {
            Self::Insert(existing) | Self::Update(existing) => *existing = record,
        }
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    versions: Vec<(RecordId, u64)>,
}

impl CommitReceipt {
    /// Version each written record ended up at, in write order.
    #[must_use]
    pub fn versions(&self) -> &[(RecordId, u64)] {
        &self.versions
    }

    /// Version the given record ended up at, if this commit wrote it.
    #[must_use]
    pub fn version_of(&self, id: &RecordId) -> Option<u64> {
        self.versions
            .iter()
            .find(|(written, _)| written == id)
            .map(|(_, version)| *version)
    }
}

/// A transaction against a [`RecordStore`].
///
/// # Invariants
///
/// - Nothing written through a unit of work is visible to others until
///   `commit` returns `Ok`.
/// - Every lock taken is released when the unit of work ends, however it ends.
#[derive(Debug)]
pub struct UnitOfWork {
    store: Arc<RecordStore>,
    owner: String,
    locks: Vec<RecordLock>,
    pending: Vec<PendingWrite>,
}

impl UnitOfWork {
    pub(crate) fn new(store: Arc<RecordStore>, owner: String) -> Self {
        tracing::trace!(owner = %owner, "unit of work begun");
        Self {
            store,
            owner,
            locks: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Name of the worker that owns this unit of work.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Whether this unit of work holds the exclusive lock on `id`.
    #[must_use]
    pub fn holds_lock(&self, id: &RecordId) -> bool {
        self.locks.iter().any(|lock| lock.id() == id)
    }

    /// Read a record, seeing this unit of work's own buffered writes.
    pub fn load(&self, id: &RecordId) -> Result<Record, StoreError> {
        if let Some(write) = self.pending.iter().find(|w| &w.record().id == id) {
            return Ok(write.record().clone());
        }
        self.store.load(id)
    }

    /// Lock a record and return it as read under the lock.
    ///
    /// With [`LockMode::Exclusive`] this suspends until no other unit of
    /// work holds the lock on `id`. The record returned is read after the
    /// lock is granted, so it reflects every commit made by earlier holders.
    /// [`LockMode::None`] just reads.
    pub async fn lock(&mut self, id: &RecordId, mode: LockMode) -> Result<Record, StoreError> {
        if mode == LockMode::Exclusive && !self.holds_lock(id) {
            let lock = self
                .store
                .locks()
                .acquire(id, &self.owner, self.store.lock_wait())
                .await?;
            self.locks.push(lock);
        }
        self.load(id)
    }

    /// Buffer an update of an existing record.
    ///
    /// Fails fast with [`StoreError::VersionConflict`] if `record.version`
    /// is already stale; the check is repeated atomically at commit.
    pub fn update(&mut self, record: Record) -> Result<(), StoreError> {
        if let Some(existing) = self
            .pending
            .iter_mut()
            .find(|w| w.record().id == record.id)
        {
            existing.replace(record);
            return Ok(());
        }

        self.store.check_version(&record)?;
        self.pending.push(PendingWrite::Update(record));
        Ok(())
    }

    /// Buffer the insert of a new record.
    pub fn insert(&mut self, record: Record) -> Result<(), StoreError> {
        let buffered = self.pending.iter().any(|w| w.record().id == record.id);
        if buffered || self.store.contains(&record.id)? {
            return Err(StoreError::AlreadyExists(record.id));
        }
        self.pending.push(PendingWrite::Insert(record));
        Ok(())
    }

    /// Number of buffered writes.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Apply every buffered write atomically and end the unit of work.
    ///
    /// Rows written without an explicit lock are locked first, so the commit
    /// waits for any other unit of work holding them. On error nothing is
    /// applied and the unit of work is rolled back.
    pub async fn commit(mut self) -> Result<CommitReceipt, StoreError> {
        match self.try_commit().await {
            Ok(receipt) => {
                tracing::debug!(
                    owner = %self.owner,
                    writes = receipt.versions.len(),
                    "unit of work committed"
                );
                Ok(receipt)
            }
            Err(e) => {
                tracing::debug!(owner = %self.owner, error = %e, "commit failed, rolled back");
                Err(e)
            }
        }
    }

    async fn try_commit(&mut self) -> Result<CommitReceipt, StoreError> {
        let mut unlocked: Vec<RecordId> = self
            .pending
            .iter()
            .map(|w| w.record().id.clone())
            .filter(|id| !self.holds_lock(id))
            .collect();
        // Fixed acquisition order across units of work.
        unlocked.sort();
        unlocked.dedup();

        for id in unlocked {
            let lock = self
                .store
                .locks()
                .acquire(&id, &self.owner, self.store.lock_wait())
                .await?;
            self.locks.push(lock);
        }

        let pending = std::mem::take(&mut self.pending);
        let versions = self.store.apply(&pending)?;
        Ok(CommitReceipt { versions })
    }

    /// Discard buffered writes and release every lock. Never fails.
    pub fn rollback(self) {
        tracing::debug!(
            owner = %self.owner,
            discarded = self.pending.len(),
            released = self.locks.len(),
            "unit of work rolled back"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn store_with(id: &str, name: &str) -> Arc<RecordStore> {
        let store = Arc::new(RecordStore::new());
        store.seed(Record::new(id, name)).unwrap();
        store
    }

    #[tokio::test]
    async fn test_commit_applies_update() {
        let store = store_with("321", "X");
        let id = RecordId::new("321");

        let mut uow = store.begin("Thread 0");
        let mut record = uow.lock(&id, LockMode::Exclusive).await.unwrap();
        assert_eq!(store.lock_holder(&id).as_deref(), Some("Thread 0"));

        record.name = "Thread 0".to_string();
        uow.update(record).unwrap();
        let receipt = uow.commit().await.unwrap();

        assert_eq!(receipt.version_of(&id), Some(1));
        assert_eq!(store.load(&id).unwrap().name, "Thread 0");
        assert_eq!(store.lock_holder(&id), None);
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let store = store_with("321", "X");
        let id = RecordId::new("321");

        let mut uow = store.begin("writer");
        let mut record = uow.load(&id).unwrap();
        record.name = "changed".to_string();
        uow.update(record).unwrap();

        assert_eq!(uow.load(&id).unwrap().name, "changed");
        assert_eq!(store.load(&id).unwrap().name, "X");

        uow.commit().await.unwrap();
        assert_eq!(store.load(&id).unwrap().name, "changed");
    }

    #[tokio::test]
    async fn test_rollback_discards_and_releases() {
        let store = store_with("321", "X");
        let id = RecordId::new("321");

        let mut uow = store.begin("Thread 0");
        let mut record = uow.lock(&id, LockMode::Exclusive).await.unwrap();
        record.name = "discarded".to_string();
        uow.update(record).unwrap();
        assert_eq!(uow.pending_writes(), 1);
        uow.rollback();

        assert_eq!(store.lock_holder(&id), None);
        assert_eq!(store.load(&id).unwrap(), Record::new("321", "X"));
    }

    #[tokio::test]
    async fn test_drop_releases_lock() {
        let store = store_with("321", "X");
        let id = RecordId::new("321");

        {
            let mut uow = store.begin("dropped");
            uow.lock(&id, LockMode::Exclusive).await.unwrap();
            assert!(uow.holds_lock(&id));
        }

        assert_eq!(store.lock_holder(&id), None);
    }

    #[tokio::test]
    async fn test_lock_none_takes_no_lock() {
        let store = store_with("123", "Y");
        let id = RecordId::new("123");

        let mut uow = store.begin("reader");
        let record = uow.lock(&id, LockMode::None).await.unwrap();
        assert_eq!(record.name, "Y");
        assert!(!uow.holds_lock(&id));
        assert_eq!(store.lock_holder(&id), None);
    }

    #[tokio::test]
    async fn test_stale_update_fails_fast() {
        let store = store_with("123", "Y");
        let id = RecordId::new("123");

        let stale = store.load(&id).unwrap();

        let mut winner = store.begin("winner");
        let mut record = winner.load(&id).unwrap();
        record.name = "winner".to_string();
        winner.update(record).unwrap();
        winner.commit().await.unwrap();

        let mut loser = store.begin("loser");
        let result = loser.update(stale);
        assert_eq!(
            result,
            Err(StoreError::VersionConflict {
                id: id.clone(),
                expected: 0,
                actual: 1,
            })
        );
    }

    #[tokio::test]
    async fn test_conflict_detected_at_commit() {
        let store = store_with("123", "Y");
        let id = RecordId::new("123");

        // Both buffer an update against version 0 before either commits.
        let mut first = store.begin("first");
        let mut a = first.load(&id).unwrap();
        a.name = "first".to_string();
        first.update(a).unwrap();

        let mut second = store.begin("second");
        let mut b = second.load(&id).unwrap();
        b.name = "second".to_string();
        second.update(b).unwrap();

        first.commit().await.unwrap();
        let result = second.commit().await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
        assert_eq!(store.load(&id).unwrap().name, "first");
    }

    #[tokio::test]
    async fn test_transactional_inserts_all_or_nothing() {
        let store = Arc::new(RecordStore::new());

        let mut uow = store.begin("inserter");
        uow.insert(Record::new("1", "transaction 1")).unwrap();
        uow.insert(Record::new("2", "x".repeat(100))).unwrap();
        let result = uow.commit().await;

        assert!(matches!(result, Err(StoreError::CommitFailure(_))));
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = store_with("1", "existing");
        let mut uow = store.begin("inserter");
        assert_eq!(
            uow.insert(Record::new("1", "again")),
            Err(StoreError::AlreadyExists(RecordId::new("1")))
        );
        uow.insert(Record::new("2", "new")).unwrap();
        assert_eq!(
            uow.insert(Record::new("2", "twice")),
            Err(StoreError::AlreadyExists(RecordId::new("2")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlocked_commit_waits_for_lock_holder() {
        let store = store_with("321", "X");
        let id = RecordId::new("321");

        let mut holder = store.begin("holder");
        holder.lock(&id, LockMode::Exclusive).await.unwrap();

        let writer = {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move {
                let mut uow = store.begin("writer");
                let mut record = uow.load(&id).unwrap();
                record.name = "writer".to_string();
                uow.update(record).unwrap();
                uow.commit().await
            })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!writer.is_finished());
        assert_eq!(store.load(&id).unwrap().name, "X");

        holder.rollback();
        let receipt = writer.await.unwrap().unwrap();
        assert_eq!(receipt.version_of(&id), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_wait_bound_applies() {
        let store = Arc::new(RecordStore::new().with_lock_wait(Some(Duration::from_millis(100))));
        store.seed(Record::new("321", "X")).unwrap();
        let id = RecordId::new("321");

        let mut holder = store.begin("holder");
        holder.lock(&id, LockMode::Exclusive).await.unwrap();

        let mut waiter = store.begin("waiter");
        let result = waiter.lock(&id, LockMode::Exclusive).await;
        assert!(matches!(result, Err(StoreError::LockTimeout { .. })));
        assert!(!waiter.holds_lock(&id));
    }
}
