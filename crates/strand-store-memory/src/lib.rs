#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strand-store-memory** – In-memory storage adapter for Strand.
//!
//! This crate provides a fast, non-persistent adapter suitable for testing,
//! development, and embedded scenarios where durability is not required. All
//! data lives in process memory and is lost when the process terminates.
//!
//! Batch inserts run under a single write guard, so concurrent batches are
//! serialized and a rejected batch leaves no trace of any of its records.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use strand_store_core::{
    Direction, EventFilter, EventRecord, EventsProvider, OutdatedProbe, Relation, RelationOp,
    RelationsProvider, Snapshot, SnapshotsProvider, StorageAdapter, Timestamp, DEFAULT_BATCH_SIZE,
};

//─────────────────────────────
//  Adapter
//─────────────────────────────

/// An in-memory, non-persistent storage adapter.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    events: MemoryEvents,
    relations: MemoryRelations,
    snapshots: MemorySnapshots,
}

impl MemoryAdapter {
    /// Create an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all stored events, relations and snapshots.
    pub async fn clear(&self) {
        self.events.inner.write().await.clear();
        self.relations.inner.write().await.clear();
        self.snapshots.inner.write().await.clear();
    }
}

impl StorageAdapter for MemoryAdapter {
    fn events(&self) -> &dyn EventsProvider {
        &self.events
    }

    fn relations(&self) -> &dyn RelationsProvider {
        &self.relations
    }

    fn snapshots(&self) -> &dyn SnapshotsProvider {
        &self.snapshots
    }
}

//─────────────────────────────
//  Events
//─────────────────────────────

/// In-memory events provider.
#[derive(Debug, Clone, Default)]
pub struct MemoryEvents {
    inner: Arc<RwLock<Vec<EventRecord>>>,
}

impl MemoryEvents {
    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the ledger is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

fn apply_filter<'a>(
    records: impl Iterator<Item = &'a EventRecord>,
    filter: &EventFilter,
) -> Vec<EventRecord> {
    let mut selected: Vec<EventRecord> = records
        .filter(|record| {
            filter
                .types
                .as_ref()
                .map(|types| types.iter().any(|kind| kind == &record.kind))
                .unwrap_or(true)
        })
        .filter(|record| {
            filter
                .cursor
                .map(|cursor| record.created > cursor)
                .unwrap_or(true)
        })
        .cloned()
        .collect();

    // Equal `created` across streams is possible; the id tie-break keeps
    // reads deterministic.
    selected.sort_by(|a, b| {
        a.created
            .cmp(&b.created)
            .then_with(|| a.id.cmp(&b.id))
    });
    if filter.direction == Some(Direction::Desc) {
        selected.reverse();
    }
    if let Some(limit) = filter.limit {
        selected.truncate(limit);
    }
    selected
}

#[async_trait]
impl EventsProvider for MemoryEvents {
    async fn insert(&self, record: EventRecord) -> Result<()> {
        let mut ledger = self.inner.write().await;
        if ledger.iter().any(|stored| stored.id == record.id) {
            bail!("duplicate event id: {}", record.id);
        }
        ledger.push(record);
        Ok(())
    }

    async fn insert_many(
        &self,
        records: Vec<EventRecord>,
        batch_size: Option<usize>,
    ) -> Result<()> {
        // The batch is verified in full before the first write; chunked
        // writes under the one guard stay atomic.
        let chunk_size = batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1);
        let mut ledger = self.inner.write().await;
        let mut batch_ids = BTreeSet::new();
        for record in &records {
            if !batch_ids.insert(record.id.as_str()) {
                bail!("duplicate event id in batch: {}", record.id);
            }
            if ledger.iter().any(|stored| stored.id == record.id) {
                bail!("duplicate event id: {}", record.id);
            }
        }
        for chunk in records.chunks(chunk_size) {
            ledger.extend_from_slice(chunk);
        }
        Ok(())
    }

    async fn get(&self, filter: EventFilter) -> Result<Vec<EventRecord>> {
        Ok(apply_filter(self.inner.read().await.iter(), &filter))
    }

    async fn get_by_stream(&self, stream: &str, filter: EventFilter) -> Result<Vec<EventRecord>> {
        let ledger = self.inner.read().await;
        Ok(apply_filter(
            ledger.iter().filter(|record| record.stream == stream),
            &filter,
        ))
    }

    async fn get_by_streams(
        &self,
        streams: &[String],
        filter: EventFilter,
    ) -> Result<Vec<EventRecord>> {
        let ledger = self.inner.read().await;
        Ok(apply_filter(
            ledger
                .iter()
                .filter(|record| streams.iter().any(|stream| stream == &record.stream)),
            &filter,
        ))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<EventRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .find(|record| record.id == id)
            .cloned())
    }

    async fn check_outdated(&self, probe: OutdatedProbe) -> Result<bool> {
        Ok(self.inner.read().await.iter().any(|record| {
            record.stream == probe.stream
                && record.kind == probe.kind
                && record.created > probe.created
        }))
    }
}

//─────────────────────────────
//  Relations
//─────────────────────────────

/// In-memory relations provider with set semantics on `(key, stream)`.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelations {
    inner: Arc<RwLock<BTreeSet<(String, String)>>>,
}

impl MemoryRelations {
    /// Number of stored pairs.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether no pairs are stored.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl RelationsProvider for MemoryRelations {
    async fn handle(&self, ops: Vec<RelationOp>) -> Result<()> {
        let mut pairs = self.inner.write().await;
        for op in ops {
            match op {
                RelationOp::Insert(relation) => {
                    pairs.insert((relation.key, relation.stream));
                }
                RelationOp::Remove(relation) => {
                    pairs.remove(&(relation.key, relation.stream));
                }
            }
        }
        Ok(())
    }

    async fn insert(&self, key: &str, stream: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .insert((key.to_owned(), stream.to_owned()));
        Ok(())
    }

    async fn insert_many(
        &self,
        relations: Vec<Relation>,
        _batch_size: Option<usize>,
    ) -> Result<()> {
        let mut pairs = self.inner.write().await;
        pairs.extend(
            relations
                .into_iter()
                .map(|relation| (relation.key, relation.stream)),
        );
        Ok(())
    }

    async fn get_by_key(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .filter(|(stored, _)| stored == key)
            .map(|(_, stream)| stream.clone())
            .collect())
    }

    async fn get_by_keys(&self, keys: &[String]) -> Result<Vec<String>> {
        let pairs = self.inner.read().await;
        let streams: BTreeSet<String> = pairs
            .iter()
            .filter(|(key, _)| keys.iter().any(|candidate| candidate == key))
            .map(|(_, stream)| stream.clone())
            .collect();
        Ok(streams.into_iter().collect())
    }

    async fn remove(&self, key: &str, stream: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .remove(&(key.to_owned(), stream.to_owned()));
        Ok(())
    }

    async fn remove_many(
        &self,
        relations: Vec<Relation>,
        _batch_size: Option<usize>,
    ) -> Result<()> {
        let mut pairs = self.inner.write().await;
        for relation in relations {
            pairs.remove(&(relation.key, relation.stream));
        }
        Ok(())
    }

    async fn remove_by_keys(&self, keys: &[String]) -> Result<()> {
        self.inner
            .write()
            .await
            .retain(|(key, _)| !keys.iter().any(|candidate| candidate == key));
        Ok(())
    }

    async fn remove_by_streams(&self, streams: &[String]) -> Result<()> {
        self.inner
            .write()
            .await
            .retain(|(_, stream)| !streams.iter().any(|candidate| candidate == stream));
        Ok(())
    }
}

//─────────────────────────────
//  Snapshots
//─────────────────────────────

/// In-memory snapshots provider keyed by `(name, stream)`.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshots {
    inner: Arc<RwLock<HashMap<(String, String), Snapshot>>>,
}

#[async_trait]
impl SnapshotsProvider for MemorySnapshots {
    async fn insert(
        &self,
        name: &str,
        stream: &str,
        cursor: Timestamp,
        state: Value,
    ) -> Result<()> {
        self.inner.write().await.insert(
            (name.to_owned(), stream.to_owned()),
            Snapshot {
                name: name.to_owned(),
                stream: stream.to_owned(),
                cursor,
                state,
            },
        );
        Ok(())
    }

    async fn get_by_stream(&self, name: &str, stream: &str) -> Result<Option<Snapshot>> {
        Ok(self
            .inner
            .read()
            .await
            .get(&(name.to_owned(), stream.to_owned()))
            .cloned())
    }

    async fn remove(&self, name: &str, stream: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .remove(&(name.to_owned(), stream.to_owned()));
        Ok(())
    }
}
