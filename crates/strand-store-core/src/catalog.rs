//! Event type definitions and the catalog that registers them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use strand_clock::Timestamp;
use uuid::Uuid;

use crate::record::{EventRecord, RecordInput};
use crate::schema::{render_issues, Issue, Schema};

/// Immutable definition of one event type: its unique name plus optional
/// validators for the data and meta payloads.
///
/// Definitions are created at startup, registered with the catalog and never
/// mutated.
#[derive(Clone)]
pub struct EventType {
    kind: String,
    data_schema: Option<Arc<dyn Schema>>,
    meta_schema: Option<Arc<dyn Schema>>,
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventType")
            .field("kind", &self.kind)
            .field("data_schema", &self.data_schema.is_some())
            .field("meta_schema", &self.meta_schema.is_some())
            .finish()
    }
}

impl EventType {
    /// Define a new event type with no payload schemas.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data_schema: None,
            meta_schema: None,
        }
    }

    /// Attach a validator for the data payload.
    pub fn with_data_schema(mut self, schema: impl Schema + 'static) -> Self {
        self.data_schema = Some(Arc::new(schema));
        self
    }

    /// Attach a validator for the meta payload.
    pub fn with_meta_schema(mut self, schema: impl Schema + 'static) -> Self {
        self.meta_schema = Some(Arc::new(schema));
        self
    }

    /// The unique type name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Record factory: instantiate a record of this type.
    ///
    /// Assigns a fresh UUID id, the target stream (or a fresh UUID when the
    /// input names none) and `created = recorded = timestamp`. The produced
    /// record is not yet validated; see [`EventType::validate`].
    pub fn record(&self, input: RecordInput, timestamp: Timestamp) -> EventRecord {
        EventRecord {
            id: Uuid::new_v4().to_string(),
            stream: input
                .stream
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: self.kind.clone(),
            data: input.data,
            meta: input.meta,
            created: timestamp,
            recorded: timestamp,
        }
    }

    /// Validate a record against this definition.
    ///
    /// Returns rendered issue lines, sorted by path depth ascending.
    pub fn validate(&self, record: &EventRecord) -> Result<(), Vec<String>> {
        if record.kind != self.kind {
            return Err(render_issues(&[Issue::new(format!(
                "record does not belong to this type: expected '{}', got '{}'",
                self.kind, record.kind
            ))]));
        }

        let mut issues: Vec<Issue> = Vec::new();
        collect_payload_issues(&mut issues, "data", record.data.as_ref(), self.data_schema.as_deref());
        collect_payload_issues(&mut issues, "meta", record.meta.as_ref(), self.meta_schema.as_deref());

        if issues.is_empty() {
            Ok(())
        } else {
            Err(render_issues(&issues))
        }
    }
}

fn collect_payload_issues(
    issues: &mut Vec<Issue>,
    label: &str,
    payload: Option<&Value>,
    schema: Option<&dyn Schema>,
) {
    let Some(payload) = payload else {
        return;
    };
    match schema {
        None => issues.push(Issue::new(format!("event type declares no {label} schema"))),
        Some(schema) => {
            if let Err(found) = schema.parse(payload) {
                issues.extend(found);
            }
        }
    }
}

/// Registry of event type definitions, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    types: HashMap<String, EventType>,
}

impl EventCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type definition, replacing any previous definition with
    /// the same name.
    pub fn register(&mut self, event_type: EventType) -> &mut Self {
        self.types.insert(event_type.kind.clone(), event_type);
        self
    }

    /// Builder-style [`EventCatalog::register`].
    pub fn with(mut self, event_type: EventType) -> Self {
        self.register(event_type);
        self
    }

    /// Look up a type definition.
    pub fn get(&self, kind: &str) -> Option<&EventType> {
        self.types.get(kind)
    }

    /// Whether a type is registered.
    pub fn has(&self, kind: &str) -> bool {
        self.types.contains_key(kind)
    }

    /// Validate a record against its registered type.
    pub fn validate(&self, record: &EventRecord) -> Result<(), Vec<String>> {
        match self.get(&record.kind) {
            Some(event_type) => event_type.validate(record),
            None => Err(render_issues(&[Issue::new(format!(
                "unknown event type: '{}'",
                record.kind
            ))])),
        }
    }
}
