//! The persisted event record and the input it is created from.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_clock::Timestamp;

/// A persisted, immutable domain event.
///
/// Records are created once by the record factory, inserted once, and never
/// mutated afterwards. `created` is assigned at record creation and travels
/// with the record across nodes; `recorded` is assigned when a record is
/// written into the local ledger and equals `created` on the originating
/// node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Globally unique identifier (UUID v4).
    pub id: String,
    /// Identifier grouping related events into one logical entity timeline.
    pub stream: String,
    /// Name of the registered event type this record belongs to.
    #[serde(rename = "type")]
    pub kind: String,
    /// Structured payload, `None` when the type carries no data schema.
    pub data: Option<Value>,
    /// Structured metadata, `None` when the type carries no meta schema.
    pub meta: Option<Value>,
    /// Hybrid logical timestamp assigned once at record creation.
    pub created: Timestamp,
    /// Hybrid logical timestamp assigned when the record entered this
    /// ledger. Differs from `created` only on replicas.
    pub recorded: Timestamp,
}

/// Input to the record factory.
///
/// ```
/// use serde_json::json;
/// use strand_store_core::RecordInput;
///
/// let input = RecordInput::new("user:created")
///     .stream("u1")
///     .data(json!({ "email": "a@x" }));
/// assert_eq!(input.kind, "user:created");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordInput {
    /// Name of the event type to instantiate.
    pub kind: String,
    /// Target stream; a fresh UUID is assigned when absent.
    pub stream: Option<String>,
    /// Data payload.
    pub data: Option<Value>,
    /// Meta payload.
    pub meta: Option<Value>,
}

impl RecordInput {
    /// Start an input for the given event type.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Target an existing stream.
    pub fn stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    /// Attach a data payload.
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach a meta payload.
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}
