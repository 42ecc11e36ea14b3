//! Optimistic protocol: read a snapshot, write to it after the think-time,
//! and let the version check decide.
//!
//! No lock is requested. Any number of workers may read the same version;
//! the first to commit wins and the rest fail with a version conflict.

use super::events::Phase;
use super::worker::Worker;
use crate::store::{CommitReceipt, StoreError};

pub(super) async fn execute(worker: &mut Worker) -> Result<CommitReceipt, StoreError> {
    let id = worker.spec().record_id.clone();
    let mut uow = worker.store().begin(worker.spec().name.clone());

    let mut record = uow.load(&id)?;
    worker.note_snapshot(record.version);
    worker.record(Phase::Loaded);
    worker.open_gate();

    record.name.clone_from(&worker.spec().written_name);
    worker.record(Phase::Mutated);

    tokio::time::sleep(worker.spec().delay).await;

    worker.record(Phase::CommitAttempted);
    uow.update(record)?;
    uow.commit().await
}
