//! Structured error kinds shared by the store and its adapters.

use strand_clock::ClockError;

use crate::record::EventRecord;

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced event type is not registered with the catalog. A
    /// programming error; never retried.
    #[error("unknown event type: '{0}'")]
    MissingEvent(String),

    /// A record failed validation against its registered type. Carries the
    /// rendered issue lines, sorted by path depth.
    #[error("invalid '{}' record on stream '{}':\n{}", .record.kind, .record.stream, .issues.join("\n"))]
    Validation {
        /// The offending record.
        record: Box<EventRecord>,
        /// Rendered issue lines.
        issues: Vec<String>,
    },

    /// The adapter rejected a write. For batches the whole batch was rolled
    /// back.
    #[error("event insertion failed: {0}")]
    Insertion(String),

    /// The clock refused to produce a timestamp.
    #[error(transparent)]
    Clock(#[from] ClockError),
}

impl StoreError {
    /// Build a [`StoreError::Validation`] from a record and its issues.
    pub fn validation(record: EventRecord, issues: Vec<String>) -> Self {
        Self::Validation {
            record: Box::new(record),
            issues,
        }
    }
}
