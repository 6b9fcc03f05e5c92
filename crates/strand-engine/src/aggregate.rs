//! Aggregate roots: domain state paired with a pending-event buffer.

use std::ops::Deref;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use strand_store_core::{EventRecord, RecordInput};

use crate::config::EventsInsertSettings;
use crate::reducer::AggregateReducer;
use crate::store::{EventStore, ReduceQuery, ReduceScope};

/// Domain state folded from the events of one stream.
///
/// Implementations provide the state transition; [`Root`] supplies the
/// pending buffer and commit operations around it.
pub trait Aggregate: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Reducer name for this aggregate; keys its snapshots.
    fn name() -> &'static str;

    /// Apply one recorded event to the state.
    fn with(&mut self, record: &EventRecord) -> Result<()>;
}

/// Exposes the pending buffer of an aggregate root for batched commits
/// across heterogeneous aggregate types.
pub trait Committable: Send {
    /// The uncommitted records, in push order.
    fn to_pending(&self) -> &[EventRecord];

    /// Clear the pending buffer.
    fn flush(&mut self);
}

/// An aggregate root: state, stream id, pending-event buffer and a handle to
/// the store it commits through.
///
/// The root holds the store explicitly; the store never owns aggregates and
/// only touches them transiently during a commit.
pub struct Root<A: Aggregate> {
    store: Arc<EventStore>,
    id: String,
    state: A,
    pending: Vec<EventRecord>,
}

impl<A: Aggregate + std::fmt::Debug> std::fmt::Debug for Root<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .finish()
    }
}

impl<A: Aggregate> Root<A> {
    /// Start an empty aggregate on a fresh stream.
    pub fn new(store: Arc<EventStore>) -> Self {
        Self::with_id(store, Uuid::new_v4().to_string())
    }

    /// Start an empty aggregate on the given stream.
    pub fn with_id(store: Arc<EventStore>, id: impl Into<String>) -> Self {
        Self {
            store,
            id: id.into(),
            state: A::default(),
            pending: Vec::new(),
        }
    }

    pub(crate) fn from_state(store: Arc<EventStore>, id: String, state: A) -> Self {
        Self {
            store,
            id,
            state,
            pending: Vec::new(),
        }
    }

    /// Hydrate an aggregate from its stream, resuming from a snapshot when
    /// one exists. `None` when the stream holds neither events nor a
    /// snapshot.
    pub async fn load(store: Arc<EventStore>, id: &str) -> Result<Option<Self>> {
        let reducer = AggregateReducer::<A>::new();
        let state = store
            .reduce(ReduceQuery::stream(id), &reducer, Vec::new())
            .await?;
        Ok(state.map(|state| Self::from_state(store, id.to_owned(), state)))
    }

    /// The stream this aggregate folds.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current state.
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Whether uncommitted records are buffered.
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Create a record through the store's catalog, apply it to the state
    /// and buffer it for the next save. The record is forced onto this
    /// aggregate's stream.
    pub fn push(&mut self, input: RecordInput) -> Result<&mut Self> {
        let input = RecordInput {
            stream: Some(self.id.clone()),
            ..input
        };
        let record = self.store.make_event(input)?;
        self.state.with(&record)?;
        self.pending.push(record);
        Ok(self)
    }

    /// Commit the pending buffer as one atomic batch. A clean aggregate is a
    /// no-op. With `flush` unset the buffer survives the save, e.g. to
    /// combine with other aggregates in a later batched commit.
    pub async fn save(&mut self, settings: Option<EventsInsertSettings>, flush: bool) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        self.store
            .push_many_events(self.pending.clone(), settings)
            .await?;
        if flush {
            self.flush();
        }
        Ok(())
    }

    /// Save, then persist a snapshot of this aggregate's reduced state.
    pub async fn snapshot(&mut self) -> Result<()> {
        self.save(None, true).await?;
        self.store
            .create_snapshot(
                ReduceScope::Stream(self.id.clone()),
                &AggregateReducer::<A>::new(),
            )
            .await
    }
}

impl<A: Aggregate> Committable for Root<A> {
    fn to_pending(&self) -> &[EventRecord] {
        &self.pending
    }

    fn flush(&mut self) {
        self.pending.clear();
    }
}

impl<A: Aggregate> Deref for Root<A> {
    type Target = A;

    fn deref(&self) -> &A {
        &self.state
    }
}
