//! Errors returned by the record store and its units of work.

use crate::types::RecordId;

/// Errors that can occur while reading, locking, or committing records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record exists for the id.
    NotFound(RecordId),
    /// An update presented a version that no longer matches the stored one.
    VersionConflict {
        /// The record the update targeted.
        id: RecordId,
        /// The version the writer read (and presented).
        expected: u64,
        /// The version currently stored.
        actual: u64,
    },
    /// An insert targeted an id that already exists.
    AlreadyExists(RecordId),
    /// A constraint rejected the commit. Nothing from the unit of work is applied.
    CommitFailure(String),
    /// The bounded lock wait elapsed before the lock was granted.
    LockTimeout {
        /// The record whose lock was requested.
        id: RecordId,
        /// How long the requester waited, in milliseconds.
        waited_ms: u64,
    },
    /// An internal mutex was poisoned by a panicking holder.
    LockPoisoned,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "record {id} not found"),
            Self::VersionConflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on record {id}: presented version {expected}, stored version {actual}"
            ),
            Self::AlreadyExists(id) => write!(f, "record {id} already exists"),
            Self::CommitFailure(reason) => write!(f, "commit failed: {reason}"),
            Self::LockTimeout { id, waited_ms } => {
                write!(f, "timed out after {waited_ms}ms waiting for lock on record {id}")
            }
            Self::LockPoisoned => write!(f, "store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}
