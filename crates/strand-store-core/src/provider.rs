//! The adapter contract: the three provider traits every storage backend
//! must satisfy, plus the query option types they share.

use anyhow::Result;
use async_trait::async_trait;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use strand_clock::Timestamp;

use crate::record::EventRecord;

/// Default chunk size for bulk writes, where the backend chunks at all.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

//─────────────────────────────
//  Query options
//─────────────────────────────

/// Sort direction of an event read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Ascending by `created` (the default).
    #[default]
    Asc,
    /// Descending by `created`.
    Desc,
}

impl Serialize for Direction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        })
    }
}

impl<'de> Deserialize<'de> for Direction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DirectionVisitor;

        impl Visitor<'_> for DirectionVisitor {
            type Value = Direction;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("\"asc\", \"desc\", 1 or -1")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Direction, E> {
                match value {
                    "asc" | "1" => Ok(Direction::Asc),
                    "desc" | "-1" => Ok(Direction::Desc),
                    other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
                }
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Direction, E> {
                match value {
                    1 => Ok(Direction::Asc),
                    -1 => Ok(Direction::Desc),
                    other => Err(E::invalid_value(de::Unexpected::Signed(other), &self)),
                }
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Direction, E> {
                self.visit_i64(value as i64)
            }
        }

        deserializer.deserialize_any(DirectionVisitor)
    }
}

/// Filter applied to event reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// Restrict to these event types.
    pub types: Option<Vec<String>>,
    /// Return only records with `created` strictly greater than the cursor.
    pub cursor: Option<Timestamp>,
    /// Sort direction; ascending by `created` when absent.
    pub direction: Option<Direction>,
    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl EventFilter {
    /// Restrict to the given event types.
    pub fn types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Return only records created strictly after `cursor`.
    pub fn cursor(mut self, cursor: Timestamp) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Set the sort direction.
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Cap the number of returned records.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Probe for [`EventsProvider::check_outdated`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutdatedProbe {
    /// Stream of the candidate record.
    pub stream: String,
    /// Event type of the candidate record.
    pub kind: String,
    /// Creation timestamp of the candidate record.
    pub created: Timestamp,
}

//─────────────────────────────
//  Events provider
//─────────────────────────────

/// Append-only persistence of event records.
///
/// Reads sort ascending by `created` unless the filter's direction says
/// otherwise. `insert_many` is transactional: a failing batch must leave no
/// trace of any of its records.
#[async_trait]
pub trait EventsProvider: Send + Sync {
    /// Persist a single record.
    async fn insert(&self, record: EventRecord) -> Result<()>;

    /// Persist a batch of records atomically. `batch_size` bounds the chunk
    /// size where the backend writes in chunks; [`DEFAULT_BATCH_SIZE`] when
    /// absent.
    async fn insert_many(&self, records: Vec<EventRecord>, batch_size: Option<usize>)
        -> Result<()>;

    /// Read records across all streams.
    async fn get(&self, filter: EventFilter) -> Result<Vec<EventRecord>>;

    /// Read records of one stream.
    async fn get_by_stream(&self, stream: &str, filter: EventFilter) -> Result<Vec<EventRecord>>;

    /// Read records of several streams, merged into one ordered list.
    async fn get_by_streams(
        &self,
        streams: &[String],
        filter: EventFilter,
    ) -> Result<Vec<EventRecord>>;

    /// Look up a record by id.
    async fn get_by_id(&self, id: &str) -> Result<Option<EventRecord>>;

    /// Whether a record exists with the probe's `(stream, kind)` and a
    /// strictly greater `created`.
    async fn check_outdated(&self, probe: OutdatedProbe) -> Result<bool>;
}

//─────────────────────────────
//  Relations provider
//─────────────────────────────

/// A `(key, stream)` pair tagging a stream into a fan-in set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// Secondary-index label.
    pub key: String,
    /// Tagged stream.
    pub stream: String,
}

impl Relation {
    /// Build a relation pair.
    pub fn new(key: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            stream: stream.into(),
        }
    }
}

/// One step of a relation mutation batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationOp {
    /// Add the pair; already-present pairs are ignored.
    Insert(Relation),
    /// Remove the pair.
    Remove(Relation),
}

/// Secondary index mapping keys to sets of streams.
///
/// `(key, stream)` is unique per ledger; duplicate inserts are silently
/// ignored.
#[async_trait]
pub trait RelationsProvider: Send + Sync {
    /// Apply a mixed batch of inserts and removals in order.
    async fn handle(&self, ops: Vec<RelationOp>) -> Result<()>;

    /// Add one pair.
    async fn insert(&self, key: &str, stream: &str) -> Result<()>;

    /// Add many pairs.
    async fn insert_many(&self, relations: Vec<Relation>, batch_size: Option<usize>)
        -> Result<()>;

    /// Streams tagged with `key`.
    async fn get_by_key(&self, key: &str) -> Result<Vec<String>>;

    /// Streams tagged with any of `keys`, deduplicated.
    async fn get_by_keys(&self, keys: &[String]) -> Result<Vec<String>>;

    /// Remove one pair.
    async fn remove(&self, key: &str, stream: &str) -> Result<()>;

    /// Remove many pairs.
    async fn remove_many(&self, relations: Vec<Relation>, batch_size: Option<usize>)
        -> Result<()>;

    /// Remove every pair under any of `keys`.
    async fn remove_by_keys(&self, keys: &[String]) -> Result<()>;

    /// Remove every pair referencing any of `streams`.
    async fn remove_by_streams(&self, streams: &[String]) -> Result<()>;
}

//─────────────────────────────
//  Snapshots provider
//─────────────────────────────

/// Cached reducer output at a cursor, keyed by reducer name and
/// stream-or-relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Reducer name.
    pub name: String,
    /// Stream or relation key the reducer ran over.
    pub stream: String,
    /// `created` timestamp of the newest folded event.
    pub cursor: Timestamp,
    /// Serialized reducer state.
    pub state: Value,
}

/// Point-in-time persistence of reduced state.
#[async_trait]
pub trait SnapshotsProvider: Send + Sync {
    /// Write a snapshot, replacing any existing one for `(name, stream)`.
    async fn insert(&self, name: &str, stream: &str, cursor: Timestamp, state: Value)
        -> Result<()>;

    /// Read the snapshot for `(name, stream)`.
    async fn get_by_stream(&self, name: &str, stream: &str) -> Result<Option<Snapshot>>;

    /// Delete the snapshot for `(name, stream)`.
    async fn remove(&self, name: &str, stream: &str) -> Result<()>;
}

//─────────────────────────────
//  Adapter
//─────────────────────────────

/// A storage adapter bundles the three providers a store runs on.
pub trait StorageAdapter: Send + Sync {
    /// The events provider.
    fn events(&self) -> &dyn EventsProvider;
    /// The relations provider.
    fn relations(&self) -> &dyn RelationsProvider;
    /// The snapshots provider.
    fn snapshots(&self) -> &dyn SnapshotsProvider;
}
