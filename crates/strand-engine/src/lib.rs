#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strand-engine** – Event store orchestration for the Strand ledger.
//!
//! The engine composes the event-type catalog, a storage adapter, the hybrid
//! logical clock and the insert hooks into the top-level
//! [`EventStore`]: the append path validates, persists and fans records out
//! to the projection layer; the read path serves stream and relation
//! queries; the reduce path folds event streams into state with
//! snapshot-accelerated resumption; aggregates pair that state with a
//! pending-event buffer and commit helpers.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use strand_engine::{EventStore, Hooks, projection_hook};
//! use strand_projector::Projector;
//! use strand_store_core::{EventCatalog, EventType, RecordInput, StorageAdapter};
//!
//! # async fn demo(adapter: Arc<dyn StorageAdapter>) -> anyhow::Result<()> {
//! let catalog = EventCatalog::new().with(EventType::new("user:created"));
//! let projector = Projector::new();
//! let store = EventStore::new(adapter, catalog)
//!     .with_hooks(Hooks {
//!         on_events_inserted: Some(projection_hook(projector.clone())),
//!         on_error: None,
//!     });
//!
//! let record = store.make_event(RecordInput::new("user:created").stream("u1"))?;
//! store.push_event(record, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod reducer;
pub mod store;

pub use aggregate::{Aggregate, Committable, Root};
pub use config::{
    projection_hook, ErrorHook, EventsInsertSettings, Hooks, InsertedHook, SnapshotPolicy,
};
pub use reducer::{AggregateReducer, FoldReducer, Reducer};
pub use store::{EventStatus, EventStore, ReduceQuery, ReduceScope};

pub use strand_store_core::{
    Direction, EventCatalog, EventFilter, EventRecord, EventType, RecordInput, Snapshot,
    StorageAdapter, StoreError, Timestamp,
};
