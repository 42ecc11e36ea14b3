//! Pessimistic protocol: read, take the Exclusive lock, hold it through the
//! think-time, write, commit.
//!
//! The lock is owned by the unit of work, so every exit path out of
//! [`execute`] (success, `?`, panic unwind) releases it.

use super::events::Phase;
use super::worker::Worker;
use crate::store::{CommitReceipt, LockMode, StoreError};

pub(super) async fn execute(worker: &mut Worker) -> Result<CommitReceipt, StoreError> {
    let id = worker.spec().record_id.clone();
    let mut uow = worker.store().begin(worker.spec().name.clone());

    let loaded = uow.load(&id)?;
    worker.note_snapshot(loaded.version);
    worker.record(Phase::Loaded);

    // Suspends while anyone else holds the row. The copy we write back is
    // the one read under the lock.
    let mut record = uow.lock(&id, LockMode::Exclusive).await?;
    worker.record(Phase::Locked);
    worker.open_gate();

    tokio::time::sleep(worker.spec().delay).await;

    record.name.clone_from(&worker.spec().written_name);
    worker.record(Phase::Mutated);

    worker.record(Phase::CommitAttempted);
    uow.update(record)?;
    uow.commit().await
}
