//! The event store: validation → persistence → fan-out.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use strand_clock::{ClockConfig, HybridLogicalClock};
use strand_store_core::{
    EventCatalog, EventFilter, EventRecord, EventsProvider, OutdatedProbe, RecordInput,
    RelationsProvider, Snapshot, SnapshotsProvider, StorageAdapter, StoreError,
};

use crate::aggregate::{Aggregate, Committable, Root};
use crate::config::{EventsInsertSettings, Hooks, SnapshotPolicy};
use crate::reducer::Reducer;

//─────────────────────────────
//  Queries
//─────────────────────────────

/// What a reduce runs over: one stream, or the fan-in of a relation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReduceScope {
    /// All events of one stream.
    Stream(String),
    /// All events of every stream tagged with this relation key.
    Relation(String),
}

impl ReduceScope {
    /// The snapshot identity of this scope.
    pub fn id(&self) -> &str {
        match self {
            ReduceScope::Stream(id) | ReduceScope::Relation(id) => id,
        }
    }
}

/// A reduce request: scope plus an optional event filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceQuery {
    /// Scope of the fold.
    pub scope: ReduceScope,
    /// Additional event filter; a snapshot's cursor overrides the filter's.
    pub filter: EventFilter,
}

impl ReduceQuery {
    /// Reduce over one stream.
    pub fn stream(id: impl Into<String>) -> Self {
        Self {
            scope: ReduceScope::Stream(id.into()),
            filter: EventFilter::default(),
        }
    }

    /// Reduce over a relation key's fan-in.
    pub fn relation(key: impl Into<String>) -> Self {
        Self {
            scope: ReduceScope::Relation(key.into()),
            filter: EventFilter::default(),
        }
    }

    /// Restrict the folded events.
    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Classification of a (possibly foreign) record against the local ledger.
///
/// This is the replication primitive: callers check the status first, then
/// skip (`exists`), insert as current, or insert while marking projections
/// outdated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStatus {
    /// The record id is already present in the ledger. When set, `outdated`
    /// is set as well: the record is already seen.
    pub exists: bool,
    /// A record with the same `(stream, type)` and a strictly greater
    /// `created` is already present.
    pub outdated: bool,
}

//─────────────────────────────
//  Event store
//─────────────────────────────

/// Top-level orchestrator over a catalog, a storage adapter, the HLC clock
/// and the insert hooks.
///
/// The store is logically single-threaded per instance: the catalog and
/// adapter are immutable shared references, the clock serializes its own
/// register, and all I/O-bearing operations are suspension points.
pub struct EventStore {
    catalog: EventCatalog,
    adapter: Arc<dyn StorageAdapter>,
    clock: HybridLogicalClock,
    snapshot_policy: SnapshotPolicy,
    hooks: Hooks,
}

impl EventStore {
    /// Create a store over `adapter` with the given catalog and default
    /// clock, snapshot policy and hooks.
    pub fn new(adapter: Arc<dyn StorageAdapter>, catalog: EventCatalog) -> Self {
        Self {
            catalog,
            adapter,
            clock: HybridLogicalClock::default(),
            snapshot_policy: SnapshotPolicy::default(),
            hooks: Hooks::default(),
        }
    }

    /// Replace the clock configuration.
    pub fn with_clock(mut self, config: ClockConfig) -> Self {
        self.clock = HybridLogicalClock::new(config);
        self
    }

    /// Set the snapshot policy.
    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }

    /// Set the lifecycle hooks.
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// The registered event types.
    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    /// The store's clock, e.g. to fold timestamps received from other nodes.
    pub fn clock(&self) -> &HybridLogicalClock {
        &self.clock
    }

    //───────────────────── append path ─────────────────────

    /// Create a validated record of a registered type.
    pub fn make_event(&self, input: RecordInput) -> Result<EventRecord> {
        let event_type = self
            .catalog
            .get(&input.kind)
            .ok_or_else(|| StoreError::MissingEvent(input.kind.clone()))?;
        let timestamp = self.clock.now().map_err(StoreError::Clock)?;
        let record = event_type.record(input, timestamp);
        if let Err(issues) = event_type.validate(&record) {
            return Err(StoreError::validation(record, issues).into());
        }
        Ok(record)
    }

    /// Validate and persist one record, then emit it to the insert hook.
    pub async fn push_event(
        &self,
        record: EventRecord,
        settings: Option<EventsInsertSettings>,
    ) -> Result<()> {
        self.validate(&record)?;
        self.adapter
            .events()
            .insert(record.clone())
            .await
            .map_err(|error| StoreError::Insertion(error.to_string()))?;
        self.emit(vec![record], settings.unwrap_or_default()).await;
        Ok(())
    }

    /// Validate and persist a batch atomically, then emit the whole batch to
    /// the insert hook exactly once. An empty batch is a no-op.
    pub async fn push_many_events(
        &self,
        records: Vec<EventRecord>,
        settings: Option<EventsInsertSettings>,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in &records {
            self.validate(record)?;
        }
        self.adapter
            .events()
            .insert_many(records.clone(), None)
            .await
            .map_err(|error| StoreError::Insertion(error.to_string()))?;
        self.emit(records, settings.unwrap_or_default()).await;
        Ok(())
    }

    /// Classify a record against the local ledger.
    pub async fn get_event_status(&self, record: &EventRecord) -> Result<EventStatus> {
        let exists = self.adapter.events().get_by_id(&record.id).await?.is_some();
        let outdated = if exists {
            // Already seen; callers treat the record as superseded.
            true
        } else {
            self.adapter
                .events()
                .check_outdated(OutdatedProbe {
                    stream: record.stream.clone(),
                    kind: record.kind.clone(),
                    created: record.created,
                })
                .await?
        };
        Ok(EventStatus { exists, outdated })
    }

    //───────────────────── read path ─────────────────────

    /// Read records across all streams.
    pub async fn get_events(&self, filter: EventFilter) -> Result<Vec<EventRecord>> {
        self.adapter.events().get(filter).await
    }

    /// Read the records of several streams, merged in `created` order.
    pub async fn get_events_by_streams(
        &self,
        streams: &[String],
        filter: EventFilter,
    ) -> Result<Vec<EventRecord>> {
        self.adapter.events().get_by_streams(streams, filter).await
    }

    /// Read the fan-in of one or more relation keys, merged in `created`
    /// order. Keys referencing no stream yield an empty list.
    pub async fn get_events_by_relations(
        &self,
        keys: &[String],
        filter: EventFilter,
    ) -> Result<Vec<EventRecord>> {
        let streams = self.adapter.relations().get_by_keys(keys).await?;
        if streams.is_empty() {
            return Ok(Vec::new());
        }
        self.adapter.events().get_by_streams(&streams, filter).await
    }

    //───────────────────── reduce path ─────────────────────

    /// Fold the scoped events into the reducer's state, resuming from a
    /// snapshot when one exists.
    ///
    /// `pending` records (e.g. an aggregate's uncommitted buffer) are folded
    /// after the stored events. Returns `None` when there is neither a
    /// snapshot nor any event to fold. Under [`SnapshotPolicy::Auto`] the
    /// result is persisted as the new snapshot.
    pub async fn reduce<R: Reducer>(
        &self,
        query: ReduceQuery,
        reducer: &R,
        pending: Vec<EventRecord>,
    ) -> Result<Option<R::State>> {
        let scope = query.scope;
        let id = scope.id().to_owned();
        let name = reducer.name().to_owned();

        let snapshot = self.adapter.snapshots().get_by_stream(&name, &id).await?;
        let mut filter = query.filter;
        let seed_state = match snapshot {
            Some(snapshot) => {
                filter.cursor = Some(snapshot.cursor);
                Some(snapshot.state)
            }
            None => None,
        };

        let mut events = match &scope {
            ReduceScope::Stream(stream) => {
                self.adapter.events().get_by_stream(stream, filter).await?
            }
            ReduceScope::Relation(key) => {
                self.get_events_by_relations(&[key.clone()], filter).await?
            }
        };
        events.extend(pending);

        if events.is_empty() {
            return match seed_state {
                Some(state) => Ok(Some(reducer.from_snapshot(state)?)),
                None => Ok(None),
            };
        }

        let seed = match seed_state {
            Some(state) => Some(reducer.from_snapshot(state)?),
            None => None,
        };
        let cursor = events.last().map(|record| record.created);
        let result = reducer.reduce(events, seed)?;

        if self.snapshot_policy == SnapshotPolicy::Auto {
            if let Some(cursor) = cursor {
                self.adapter
                    .snapshots()
                    .insert(&name, &id, cursor, serde_json::to_value(&result)?)
                    .await?;
            }
        }
        Ok(Some(result))
    }

    //───────────────────── snapshots ─────────────────────

    /// Fold the scope's full event list and persist the result as its
    /// snapshot. A scope with no events is a no-op.
    pub async fn create_snapshot<R: Reducer>(&self, scope: ReduceScope, reducer: &R) -> Result<()> {
        let id = scope.id().to_owned();
        let events = match &scope {
            ReduceScope::Stream(stream) => {
                self.adapter
                    .events()
                    .get_by_stream(stream, EventFilter::default())
                    .await?
            }
            ReduceScope::Relation(key) => {
                self.get_events_by_relations(&[key.clone()], EventFilter::default())
                    .await?
            }
        };
        let Some(cursor) = events.last().map(|record| record.created) else {
            return Ok(());
        };
        let state = reducer.reduce(events, None)?;
        self.adapter
            .snapshots()
            .insert(reducer.name(), &id, cursor, serde_json::to_value(&state)?)
            .await?;
        debug!(name = reducer.name(), id = %id, "snapshot written");
        Ok(())
    }

    /// Read the snapshot for `(name, stream_or_relation)`.
    pub async fn get_snapshot(&self, name: &str, id: &str) -> Result<Option<Snapshot>> {
        self.adapter.snapshots().get_by_stream(name, id).await
    }

    /// Delete the snapshot for `(name, stream_or_relation)`.
    pub async fn delete_snapshot(&self, name: &str, id: &str) -> Result<()> {
        self.adapter.snapshots().remove(name, id).await
    }

    //───────────────────── aggregates ─────────────────────

    /// Commit one aggregate's pending buffer; flushes it on success.
    pub async fn push_aggregate<A: Aggregate>(
        &self,
        root: &mut Root<A>,
        settings: Option<EventsInsertSettings>,
    ) -> Result<()> {
        let pending = root.to_pending().to_vec();
        if pending.is_empty() {
            return Ok(());
        }
        self.push_many_events(pending, settings).await?;
        root.flush();
        Ok(())
    }

    /// Commit the pending buffers of several aggregates as one atomic batch;
    /// flushes all of them on success.
    pub async fn push_many_aggregates(
        &self,
        roots: &mut [&mut dyn Committable],
        settings: Option<EventsInsertSettings>,
    ) -> Result<()> {
        let batch: Vec<EventRecord> = roots
            .iter()
            .flat_map(|root| root.to_pending().iter().cloned())
            .collect();
        if batch.is_empty() {
            return Ok(());
        }
        self.push_many_events(batch, settings).await?;
        for root in roots.iter_mut() {
            root.flush();
        }
        Ok(())
    }

    //───────────────────── internals ─────────────────────

    fn validate(&self, record: &EventRecord) -> Result<(), StoreError> {
        let event_type = self
            .catalog
            .get(&record.kind)
            .ok_or_else(|| StoreError::MissingEvent(record.kind.clone()))?;
        if let Err(issues) = event_type.validate(record) {
            return Err(StoreError::validation(record.clone(), issues));
        }
        Ok(())
    }

    /// Run the insert hook; hook failures are absorbed into `on_error` and
    /// never fail the insert that triggered them.
    async fn emit(&self, records: Vec<EventRecord>, settings: EventsInsertSettings) {
        if !settings.emit {
            return;
        }
        debug!(count = records.len(), batch = ?settings.batch, "events inserted");
        if let Some(hook) = &self.hooks.on_events_inserted {
            if let Err(error) = hook(records, settings).await {
                self.hooks.report(error);
            }
        }
    }
}
