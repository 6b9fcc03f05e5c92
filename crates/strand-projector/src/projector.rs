//! Replay-aware fan-out of recorded events to typed subscribers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::Result;
use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use tracing::warn;

use strand_store_core::EventRecord;

use crate::queue::{QueuePush, SerialQueue};

//─────────────────────────────
//  Subscription model
//─────────────────────────────

/// Delivery status attached to a pushed record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStatus {
    /// The record is being reprocessed (replay/sync) rather than seen for
    /// the first time.
    pub hydrated: bool,
    /// A newer record of the same `(stream, type)` already exists in the
    /// ledger.
    pub outdated: bool,
}

impl ProjectionStatus {
    /// Status of a record dispatched right after its first insert.
    pub const fn first_delivery() -> Self {
        Self {
            hydrated: false,
            outdated: false,
        }
    }

    /// Build a status from its parts.
    pub const fn new(hydrated: bool, outdated: bool) -> Self {
        Self { hydrated, outdated }
    }
}

/// Replay sensitivity of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Side effects that must never replay: rejects hydrated and outdated
    /// deliveries.
    Once,
    /// Read-model default: accepts replays, rejects outdated deliveries.
    On,
    /// Ordering-agnostic catch-all: accepts everything.
    All,
}

impl SubscriptionMode {
    /// Whether a delivery with `status` reaches handlers in this mode.
    /// Filtered deliveries are silent, never errors.
    pub fn accepts(&self, status: ProjectionStatus) -> bool {
        match self {
            SubscriptionMode::Once => !status.hydrated && !status.outdated,
            SubscriptionMode::On => !status.outdated,
            SubscriptionMode::All => true,
        }
    }
}

/// Async event handler. The resolved value is handed to
/// [`Effects::on_success`] where effects are attached.
pub type Handler =
    Arc<dyn Fn(EventRecord) -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync>;

/// Async handler over a full insert batch.
pub type BatchHandler = Arc<dyn Fn(Vec<EventRecord>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Callback receiving a handler's resolved value and the record.
pub type SuccessCallback = Arc<dyn Fn(Option<Value>, EventRecord) + Send + Sync>;

/// Callback receiving a handler's failure and the record.
pub type ErrorCallback = Arc<dyn Fn(anyhow::Error, EventRecord) + Send + Sync>;

/// Side-effect routing for a subscription. With effects attached, handler
/// outcomes land here and never fail the dispatch slot.
#[derive(Clone, Default)]
pub struct Effects {
    /// Called when the handler resolves.
    pub on_success: Option<SuccessCallback>,
    /// Called when the handler fails.
    pub on_error: Option<ErrorCallback>,
}

impl Effects {
    /// Effects with only a success callback.
    pub fn on_success(callback: impl Fn(Option<Value>, EventRecord) + Send + Sync + 'static) -> Self {
        Self {
            on_success: Some(Arc::new(callback)),
            on_error: None,
        }
    }

    /// Effects with only an error callback.
    pub fn on_error(callback: impl Fn(anyhow::Error, EventRecord) + Send + Sync + 'static) -> Self {
        Self {
            on_success: None,
            on_error: Some(Arc::new(callback)),
        }
    }

    /// Attach a success callback.
    pub fn and_success(
        mut self,
        callback: impl Fn(Option<Value>, EventRecord) + Send + Sync + 'static,
    ) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Attach an error callback.
    pub fn and_error(
        mut self,
        callback: impl Fn(anyhow::Error, EventRecord) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

#[derive(Clone)]
struct Listener {
    id: u64,
    mode: SubscriptionMode,
    handler: Handler,
    effects: Option<Effects>,
}

/// Unsubscribe token returned by the subscribe methods.
///
/// Unsubscribing removes the handler synchronously; in-flight invocations
/// run to completion. The token holds only a weak back-reference, so it
/// never keeps a dropped projector alive.
#[must_use = "dropping the token does not unsubscribe; call unsubscribe()"]
pub struct Subscription {
    inner: Weak<ProjectorInner>,
    kind: String,
    id: u64,
}

impl Subscription {
    /// Remove the handler from the projector.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut listeners = inner.listeners.lock().expect("listener map poisoned");
            if let Some(entries) = listeners.get_mut(&self.kind) {
                entries.retain(|listener| listener.id != self.id);
                if entries.is_empty() {
                    listeners.remove(&self.kind);
                }
            }
        }
    }
}

/// Unsubscribe token for a batch subscription.
#[must_use = "dropping the token does not unsubscribe; call unsubscribe()"]
pub struct BatchSubscription {
    inner: Weak<ProjectorInner>,
    batch_key: String,
    id: u64,
}

impl BatchSubscription {
    /// Remove the batch handler from the projector.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut batched = inner.batched.lock().expect("batch map poisoned");
            if let Some(entries) = batched.get_mut(&self.batch_key) {
                entries.retain(|(id, _)| *id != self.id);
                if entries.is_empty() {
                    batched.remove(&self.batch_key);
                }
            }
        }
    }
}

//─────────────────────────────
//  Projector
//─────────────────────────────

type DispatchMessage = (EventRecord, ProjectionStatus);

struct ProjectorInner {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    batched: Mutex<HashMap<String, Vec<(u64, BatchHandler)>>>,
    queues: Mutex<HashMap<String, SerialQueue<DispatchMessage>>>,
}

/// Per-stream serial dispatcher with replay-sensitive subscription modes.
///
/// Records sharing a stream are handled strictly FIFO through a per-stream
/// [`SerialQueue`]; across streams dispatch proceeds in parallel. Within one
/// queue slot, all listeners for the record's type run concurrently and the
/// slot completes when all of them complete.
#[derive(Clone)]
pub struct Projector {
    inner: Arc<ProjectorInner>,
}

impl Default for Projector {
    fn default() -> Self {
        Self::new()
    }
}

impl Projector {
    /// Create a projector with no subscriptions.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ProjectorInner {
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
                batched: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    //───────────────────── subscriptions ─────────────────────

    /// Subscribe a handler for `kind` under the given mode.
    pub fn subscribe(
        &self,
        kind: &str,
        mode: SubscriptionMode,
        handler: Handler,
        effects: Option<Effects>,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .expect("listener map poisoned")
            .entry(kind.to_owned())
            .or_default()
            .push(Listener {
                id,
                mode,
                handler,
                effects,
            });
        Subscription {
            inner: Arc::downgrade(&self.inner),
            kind: kind.to_owned(),
            id,
        }
    }

    /// Subscribe a non-replayable side effect: rejects hydrated and outdated
    /// deliveries, routes handler outcomes to `effects`.
    pub fn once<F, Fut>(&self, kind: &str, handler: F, effects: Effects) -> Subscription
    where
        F: Fn(EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        self.subscribe(kind, SubscriptionMode::Once, wrap(handler), Some(effects))
    }

    /// Subscribe a replay-safe read-model handler: rejects outdated
    /// deliveries only.
    pub fn on<F, Fut>(&self, kind: &str, handler: F) -> Subscription
    where
        F: Fn(EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        self.subscribe(kind, SubscriptionMode::On, wrap(handler), None)
    }

    /// Subscribe an ordering-agnostic handler that accepts every delivery.
    pub fn all<F, Fut>(&self, kind: &str, handler: F) -> Subscription
    where
        F: Fn(EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        self.subscribe(kind, SubscriptionMode::All, wrap(handler), None)
    }

    /// Subscribe a handler receiving whole insert batches pushed under
    /// `batch_key`.
    pub fn subscribe_batch<F, Fut>(&self, batch_key: &str, handler: F) -> BatchSubscription
    where
        F: Fn(Vec<EventRecord>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: BatchHandler = Arc::new(move |records| Box::pin(handler(records)));
        self.inner
            .batched
            .lock()
            .expect("batch map poisoned")
            .entry(batch_key.to_owned())
            .or_default()
            .push((id, handler));
        BatchSubscription {
            inner: Arc::downgrade(&self.inner),
            batch_key: batch_key.to_owned(),
            id,
        }
    }

    //───────────────────── dispatch ─────────────────────

    /// Dispatch one record through its stream's serial queue.
    ///
    /// Resolves `true` once every accepting listener completed, `false` when
    /// the record was flushed out of the queue before dispatch. A failing
    /// `on`/`all` handler without effects rejects the slot and surfaces
    /// here.
    pub async fn push(&self, record: EventRecord, status: ProjectionStatus) -> Result<bool> {
        let stream = record.stream.clone();
        let mut message = (record, status);
        let receiver = loop {
            let queue = self.queue_for(&stream);
            match queue.push(message) {
                QueuePush::Queued(receiver) => break receiver,
                QueuePush::Retired(returned) => {
                    // The instance drained between map lookup and push; drop
                    // it and allocate a fresh one on the next loop turn.
                    message = returned;
                    self.remove_retired_queue(&stream);
                }
            }
        };
        match receiver.await {
            Ok(result) => result.map(|_| true),
            Err(_) => Ok(false),
        }
    }

    /// Invoke every batch handler registered under `batch_key` with the full
    /// record list, in parallel, without per-stream serialization.
    pub async fn push_many(&self, batch_key: &str, records: Vec<EventRecord>) -> Result<()> {
        let handlers: Vec<BatchHandler> = {
            let batched = self.inner.batched.lock().expect("batch map poisoned");
            batched
                .get(batch_key)
                .map(|entries| entries.iter().map(|(_, handler)| Arc::clone(handler)).collect())
                .unwrap_or_default()
        };

        let outcomes = join_all(handlers.iter().map(|handler| handler(records.clone()))).await;
        outcomes.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }

    /// Number of live per-stream queues (diagnostic).
    pub fn active_queues(&self) -> usize {
        self.inner.queues.lock().expect("queue map poisoned").len()
    }

    fn queue_for(&self, stream: &str) -> SerialQueue<DispatchMessage> {
        let mut queues = self.inner.queues.lock().expect("queue map poisoned");
        queues
            .entry(stream.to_owned())
            .or_insert_with(|| {
                let weak = Arc::downgrade(&self.inner);
                let worker_weak = Weak::clone(&weak);
                let drained_stream = stream.to_owned();
                SerialQueue::new(
                    Arc::new(move |(record, status): DispatchMessage| {
                        dispatch(Weak::clone(&worker_weak), record, status)
                    }),
                    move || {
                        if let Some(inner) = weak.upgrade() {
                            let mut queues = inner.queues.lock().expect("queue map poisoned");
                            let retired = queues
                                .get(&drained_stream)
                                .map(SerialQueue::is_retired)
                                .unwrap_or(false);
                            if retired {
                                queues.remove(&drained_stream);
                            }
                        }
                    },
                )
            })
            .clone()
    }

    fn remove_retired_queue(&self, stream: &str) {
        let mut queues = self.inner.queues.lock().expect("queue map poisoned");
        let retired = queues
            .get(stream)
            .map(SerialQueue::is_retired)
            .unwrap_or(false);
        if retired {
            queues.remove(stream);
        }
    }
}

fn wrap<F, Fut>(handler: F) -> Handler
where
    F: Fn(EventRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
{
    Arc::new(move |record| Box::pin(handler(record)))
}

/// One queue slot: run every accepting listener for the record's type
/// concurrently; the slot completes when all of them complete.
fn dispatch(
    inner: Weak<ProjectorInner>,
    record: EventRecord,
    status: ProjectionStatus,
) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
        let Some(inner) = inner.upgrade() else {
            return Ok(());
        };
        let listeners: Vec<Listener> = {
            let listeners = inner.listeners.lock().expect("listener map poisoned");
            listeners
                .get(&record.kind)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|listener| listener.mode.accepts(status))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        drop(inner);

        let outcomes = join_all(
            listeners
                .into_iter()
                .map(|listener| run_listener(listener, record.clone())),
        )
        .await;
        outcomes.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    })
}

async fn run_listener(listener: Listener, record: EventRecord) -> Result<()> {
    let outcome = (listener.handler)(record.clone()).await;
    match listener.effects {
        Some(effects) => {
            match outcome {
                Ok(data) => {
                    if let Some(on_success) = effects.on_success {
                        on_success(data, record);
                    }
                }
                Err(error) => {
                    if let Some(on_error) = effects.on_error {
                        on_error(error, record);
                    } else {
                        warn!(
                            kind = %record.kind,
                            stream = %record.stream,
                            %error,
                            "projection handler failed with no error effect"
                        );
                    }
                }
            }
            Ok(())
        }
        None => match listener.mode {
            // A once handler never fails the slot; its failures are side
            // effects by definition.
            SubscriptionMode::Once => {
                if let Err(error) = outcome {
                    warn!(
                        kind = %record.kind,
                        stream = %record.stream,
                        %error,
                        "once handler failed with no effects attached"
                    );
                }
                Ok(())
            }
            _ => outcome.map(|_| ()),
        },
    }
}
