#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strand-store-core** – Core storage abstractions for the Strand ledger.
//!
//! This crate defines the event record model, the event-type catalog with its
//! pluggable schema capability, and the adapter contract every storage
//! backend must satisfy. It contains no concrete persistence: drivers
//! (in-memory, relational, embedded) implement the provider traits in
//! separate crates that depend on this core abstraction.

pub mod catalog;
pub mod error;
pub mod provider;
pub mod record;
pub mod schema;

pub use catalog::{EventCatalog, EventType};
pub use error::StoreError;
pub use provider::{
    Direction, EventFilter, EventsProvider, OutdatedProbe, Relation, RelationOp,
    RelationsProvider, Snapshot, SnapshotsProvider, StorageAdapter, DEFAULT_BATCH_SIZE,
};
pub use record::{EventRecord, RecordInput};
pub use schema::{render_issues, Issue, PathSegment, Schema};
pub use strand_clock::{ClockError, Timestamp};

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::catalog::{EventCatalog, EventType};
    pub use super::error::StoreError;
    pub use super::provider::{
        Direction, EventFilter, EventsProvider, OutdatedProbe, Relation, RelationOp,
        RelationsProvider, Snapshot, SnapshotsProvider, StorageAdapter,
    };
    pub use super::record::{EventRecord, RecordInput};
    pub use super::schema::{Issue, PathSegment, Schema};
    pub use strand_clock::{ClockError, Timestamp};
}
