//! Autocommit versus unit-of-work inserts.
//!
//! Inserts two fresh records, the second of which breaks the name-length
//! constraint. Under autocommit the first insert survives the failure of the
//! second; inside one unit of work neither does.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::store::{RecordStore, StoreError};
use crate::types::{Record, RecordId};

/// Longest generated record id.
const MAX_ID_LENGTH: usize = 10;

/// How the demo writes its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Every insert is its own commit.
    Autocommit,
    /// Both inserts share one unit of work.
    Transactional,
}

/// What a demo run attempted and what it left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionReport {
    /// Mode the run used.
    pub mode: WriteMode,
    /// Ids the run tried to insert, in order.
    pub attempted: Vec<RecordId>,
    /// Attempted ids present in the store afterwards.
    pub persisted: Vec<RecordId>,
    /// The error that stopped the run, if any.
    pub error: Option<String>,
}

impl TransactionReport {
    /// Whether the run left all or none of its records behind.
    #[must_use]
    pub fn is_atomic(&self) -> bool {
        self.persisted.is_empty() || self.persisted == self.attempted
    }
}

/// Runs the insert demo against a store.
#[derive(Debug)]
pub struct TransactionDriver {
    store: Arc<RecordStore>,
    rng: StdRng,
}

impl TransactionDriver {
    /// Create a driver whose generated ids are reproducible for `seed`.
    #[must_use]
    pub fn new(store: Arc<RecordStore>, seed: u64) -> Self {
        Self {
            store,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A numeric id of at most ten characters not yet in the store.
    pub fn random_id(&mut self) -> Result<RecordId, StoreError> {
        loop {
            let mut id = self.rng.random::<u32>().to_string();
            id.truncate(MAX_ID_LENGTH);
            let id = RecordId::new(id);
            if !self.store.contains(&id)? {
                return Ok(id);
            }
        }
    }

    /// Insert one valid and one oversized record using `mode`.
    ///
    /// The oversized insert always fails; the returned report says which of
    /// the two records survived.
    pub async fn run(&mut self, mode: WriteMode) -> Result<TransactionReport, StoreError> {
        let first = Record::new(
            self.random_id()?,
            match mode {
                WriteMode::Autocommit => "plain 1",
                WriteMode::Transactional => "transaction 1",
            },
        );
        let mut second_id = self.random_id()?;
        while second_id == first.id {
            second_id = self.random_id()?;
        }
        let oversized = "x".repeat(self.store.max_name_length().saturating_add(1).max(100));
        let second = Record::new(second_id, oversized);

        let attempted = vec![first.id.clone(), second.id.clone()];
        tracing::debug!(?mode, first = %first.id, second = %second.id, "START TRANSACTION DEMO");

        let error = match mode {
            WriteMode::Autocommit => self
                .store
                .save(first)
                .and_then(|()| self.store.save(second))
                .err(),
            WriteMode::Transactional => {
                let mut uow = self.store.begin(format!("{mode:?}"));
                match uow.insert(first).and_then(|()| uow.insert(second)) {
                    Ok(()) => uow.commit().await.err(),
                    Err(e) => {
                        uow.rollback();
                        Some(e)
                    }
                }
            }
        };

        if let Some(e) = &error {
            tracing::warn!(?mode, error = %e, "transaction demo write failed");
        }

        let mut persisted = Vec::with_capacity(attempted.len());
        for id in &attempted {
            if self.store.contains(id)? {
                persisted.push(id.clone());
            }
        }

        Ok(TransactionReport {
            mode,
            attempted,
            persisted,
            error: error.map(|e| e.to_string()),
        })
    }
}
