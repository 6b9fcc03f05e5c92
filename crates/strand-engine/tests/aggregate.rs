use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use strand_engine::{
    Aggregate, Committable, EventCatalog, EventFilter, EventRecord, EventStore, EventType, Hooks,
    RecordInput, Root,
};
use strand_store_core::{Issue, Schema};
use strand_store_memory::MemoryAdapter;

//──────────────────────────────────────────────────────────────────────────────
//  Fixtures
//──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct UserAccount {
    email: Option<String>,
    given: Option<String>,
    changes: u64,
}

impl Aggregate for UserAccount {
    fn name() -> &'static str {
        "user-account"
    }

    fn with(&mut self, record: &EventRecord) -> Result<()> {
        let data = record.data.as_ref();
        match record.kind.as_str() {
            "user:created" => {
                self.email = data
                    .and_then(|data| data["email"].as_str())
                    .map(str::to_owned);
            }
            "user:email-set" => {
                self.email = data
                    .and_then(|data| data["email"].as_str())
                    .map(str::to_owned);
            }
            "user:given-set" => {
                self.given = data
                    .and_then(|data| data["given"].as_str())
                    .map(str::to_owned);
            }
            _ => {}
        }
        self.changes += 1;
        Ok(())
    }
}

fn object_with_string(field: &'static str) -> impl Schema {
    move |value: &serde_json::Value| {
        if value.get(field).map(|entry| entry.is_string()).unwrap_or(false) {
            Ok(())
        } else {
            Err(vec![Issue::new(format!("expected a {field} string"))])
        }
    }
}

fn catalog() -> EventCatalog {
    EventCatalog::new()
        .with(EventType::new("user:created").with_data_schema(object_with_string("email")))
        .with(EventType::new("user:email-set").with_data_schema(object_with_string("email")))
        .with(EventType::new("user:given-set").with_data_schema(object_with_string("given")))
}

fn store(adapter: Arc<MemoryAdapter>) -> Arc<EventStore> {
    Arc::new(EventStore::new(adapter, catalog()))
}

fn counting_store(adapter: Arc<MemoryAdapter>) -> (Arc<Mutex<Vec<usize>>>, Arc<EventStore>) {
    let batches: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    let hooks = Hooks::default().on_events_inserted(move |records: Vec<EventRecord>, _settings| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(records.len());
            Ok(())
        }
    });
    (
        batches,
        Arc::new(EventStore::new(adapter, catalog()).with_hooks(hooks)),
    )
}

//──────────────────────────────────────────────────────────────────────────────
//  Pending buffer
//──────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn push_applies_events_and_buffers_them() -> Result<()> {
    let store = store(Arc::new(MemoryAdapter::new()));
    let mut account = Root::<UserAccount>::new(Arc::clone(&store));

    assert!(!account.is_dirty());
    account
        .push(RecordInput::new("user:created").data(json!({ "email": "a@x" })))?
        .push(RecordInput::new("user:given-set").data(json!({ "given": "Ada" })))?;

    assert!(account.is_dirty());
    assert_eq!(account.email.as_deref(), Some("a@x"));
    assert_eq!(account.given.as_deref(), Some("Ada"));
    assert_eq!(account.changes, 2);

    let pending = account.to_pending();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|record| record.stream == account.id()));

    // Nothing hits the ledger until a save.
    assert!(store.get_events(EventFilter::default()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn push_rejects_invalid_payloads_without_buffering() -> Result<()> {
    let store = store(Arc::new(MemoryAdapter::new()));
    let mut account = Root::<UserAccount>::new(Arc::clone(&store));

    let error = account
        .push(RecordInput::new("user:created").data(json!({ "email": 42 })))
        .unwrap_err();
    assert!(error.to_string().contains("invalid"));
    assert!(!account.is_dirty());
    assert_eq!(account.changes, 0);
    Ok(())
}

//──────────────────────────────────────────────────────────────────────────────
//  Saving
//──────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn save_commits_one_batch_and_flushes() -> Result<()> {
    let (batches, store) = counting_store(Arc::new(MemoryAdapter::new()));
    let mut account = Root::<UserAccount>::new(Arc::clone(&store));
    account
        .push(RecordInput::new("user:created").data(json!({ "email": "a@x" })))?
        .push(RecordInput::new("user:email-set").data(json!({ "email": "b@x" })))?;

    account.save(None, true).await?;
    assert!(!account.is_dirty());
    assert_eq!(
        store
            .get_events_by_streams(&[account.id().to_owned()], EventFilter::default())
            .await?
            .len(),
        2
    );

    // A clean save is a no-op: no extra batch, no extra records.
    account.save(None, true).await?;
    assert_eq!(*batches.lock().unwrap(), vec![2]);
    Ok(())
}

#[tokio::test]
async fn save_can_keep_the_pending_buffer() -> Result<()> {
    let store = store(Arc::new(MemoryAdapter::new()));
    let mut account = Root::<UserAccount>::new(Arc::clone(&store));
    account.push(RecordInput::new("user:created").data(json!({ "email": "a@x" })))?;

    account.save(None, false).await?;
    assert!(account.is_dirty(), "unflushed save keeps the buffer");
    account.flush();
    assert!(!account.is_dirty());
    Ok(())
}

#[tokio::test]
async fn push_many_aggregates_commits_everything_atomically() -> Result<()> {
    let (batches, store) = counting_store(Arc::new(MemoryAdapter::new()));

    let mut ada = Root::<UserAccount>::new(Arc::clone(&store));
    ada.push(RecordInput::new("user:created").data(json!({ "email": "ada@x" })))?;
    let mut grace = Root::<UserAccount>::new(Arc::clone(&store));
    grace
        .push(RecordInput::new("user:created").data(json!({ "email": "grace@x" })))?
        .push(RecordInput::new("user:given-set").data(json!({ "given": "Grace" })))?;

    store
        .push_many_aggregates(&mut [&mut ada as &mut dyn Committable, &mut grace], None)
        .await?;

    assert!(!ada.is_dirty() && !grace.is_dirty());
    assert_eq!(*batches.lock().unwrap(), vec![3], "one emit for the whole batch");
    assert_eq!(store.get_events(EventFilter::default()).await?.len(), 3);
    Ok(())
}

//──────────────────────────────────────────────────────────────────────────────
//  Hydration and snapshots
//──────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn load_aggregate_rehydrates_from_the_stream() -> Result<()> {
    let store = store(Arc::new(MemoryAdapter::new()));
    let mut account = Root::<UserAccount>::new(Arc::clone(&store));
    account
        .push(RecordInput::new("user:created").data(json!({ "email": "a@x" })))?
        .push(RecordInput::new("user:email-set").data(json!({ "email": "b@x" })))?;
    account.save(None, true).await?;
    let id = account.id().to_owned();

    let loaded = Root::<UserAccount>::load(Arc::clone(&store), &id)
        .await?
        .expect("stream has events");
    assert_eq!(loaded.state(), account.state());
    assert_eq!(loaded.email.as_deref(), Some("b@x"));

    assert!(Root::<UserAccount>::load(Arc::clone(&store), "ghost")
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn snapshot_saves_then_accelerates_loading() -> Result<()> {
    let store = store(Arc::new(MemoryAdapter::new()));
    let mut account = Root::<UserAccount>::with_id(Arc::clone(&store), "u1");
    account
        .push(RecordInput::new("user:created").data(json!({ "email": "a@x" })))?
        .push(RecordInput::new("user:given-set").data(json!({ "given": "Ada" })))?;
    account.snapshot().await?;

    let snapshot = store
        .get_snapshot("user-account", "u1")
        .await?
        .expect("snapshot written");
    let frozen: UserAccount = serde_json::from_value(snapshot.state)?;
    assert_eq!(frozen.changes, 2);

    // Events after the snapshot still fold in on load.
    let mut account = Root::<UserAccount>::load(Arc::clone(&store), "u1")
        .await?
        .expect("stream has events");
    account.push(RecordInput::new("user:email-set").data(json!({ "email": "c@x" })))?;
    account.save(None, true).await?;

    let reloaded = Root::<UserAccount>::load(Arc::clone(&store), "u1")
        .await?
        .expect("stream has events");
    assert_eq!(reloaded.email.as_deref(), Some("c@x"));
    assert_eq!(reloaded.changes, 3);
    Ok(())
}
