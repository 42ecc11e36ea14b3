//! The record type that competing workers update.
//!
//! A record is identified by its [`RecordId`] and carries a single mutable
//! field (`name`) plus a `version` counter that the store bumps on every
//! committed update.

use std::fmt;

use serde::Serialize;

/// Identifier of a record in the store.
///
/// # Invariants
///
/// - Two records are the same logical record iff their ids are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a record ID from anything string-like.
    ///
    /// # Examples
    ///
    /// ```
    /// use locksim::types::RecordId;
    /// let id = RecordId::new("321");
    /// assert_eq!(id.as_str(), "321");
    /// ```
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A versioned record.
///
/// Workers hold an in-memory copy; `version` is the version the copy was
/// read at and is what the store checks when the copy is written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    /// Identity of the record.
    pub id: RecordId,
    /// The mutable payload.
    pub name: String,
    /// Version counter, maintained by the store.
    pub version: u64,
}

impl Record {
    /// Create a record at version 0.
    #[must_use]
    pub fn new(id: impl Into<RecordId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: 0,
        }
    }

    /// Return a copy of this record at the given version.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}
