//! Shared value types.

mod record;

pub use record::{Record, RecordId};
