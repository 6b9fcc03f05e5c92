//! Store configuration: insert settings, snapshot policy and hooks.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use tracing::error;

use strand_projector::{ProjectionStatus, Projector};
use strand_store_core::EventRecord;

/// Settings applied to one insert operation.
#[derive(Debug, Clone)]
pub struct EventsInsertSettings {
    /// Whether to run the `on_events_inserted` hook after a successful
    /// insert. Defaults to `true`.
    pub emit: bool,
    /// Route the emitted records to batched listeners under this key instead
    /// of per-record projection.
    pub batch: Option<String>,
}

impl Default for EventsInsertSettings {
    fn default() -> Self {
        Self {
            emit: true,
            batch: None,
        }
    }
}

impl EventsInsertSettings {
    /// Insert without emitting to the hook.
    pub fn silent() -> Self {
        Self {
            emit: false,
            batch: None,
        }
    }

    /// Emit the records as one batch under `key`.
    pub fn batched(key: impl Into<String>) -> Self {
        Self {
            emit: true,
            batch: Some(key.into()),
        }
    }
}

/// When the store persists snapshots during [`reduce`](crate::EventStore::reduce).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// Snapshots are written only through
    /// [`create_snapshot`](crate::EventStore::create_snapshot).
    #[default]
    Manual,
    /// Every reduce that folded at least one event persists its result.
    Auto,
}

/// Hook invoked with every successfully inserted batch.
pub type InsertedHook =
    Arc<dyn Fn(Vec<EventRecord>, EventsInsertSettings) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Hook receiving absorbed failures (insert hooks, projection errors).
pub type ErrorHook = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

/// Store lifecycle hooks.
///
/// Hook failures never fail the insert that triggered them: an
/// `on_events_inserted` error is routed to `on_error`, and the default
/// `on_error` logs it.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Called exactly once per successful insert with the full record list.
    pub on_events_inserted: Option<InsertedHook>,
    /// Sink for absorbed failures; logs when absent.
    pub on_error: Option<ErrorHook>,
}

impl Hooks {
    /// Attach an `on_events_inserted` hook.
    pub fn on_events_inserted<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Vec<EventRecord>, EventsInsertSettings) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_events_inserted = Some(Arc::new(move |records, settings| {
            Box::pin(hook(records, settings))
        }));
        self
    }

    /// Attach an `on_error` sink.
    pub fn on_error(mut self, hook: impl Fn(anyhow::Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub(crate) fn report(&self, error: anyhow::Error) {
        match &self.on_error {
            Some(hook) => hook(error),
            None => error!(%error, "event store hook failed"),
        }
    }
}

/// Adapt a projector into an `on_events_inserted` hook.
///
/// Batched settings fan the whole list out through
/// [`Projector::push_many`]; otherwise records are pushed one at a time with
/// a first-delivery status, and a projection failure rejects the hook (which
/// the store routes to `on_error`).
pub fn projection_hook(projector: Projector) -> InsertedHook {
    Arc::new(move |records, settings| {
        let projector = projector.clone();
        Box::pin(async move {
            match settings.batch {
                Some(batch_key) => projector.push_many(&batch_key, records).await,
                None => {
                    for record in records {
                        projector
                            .push(record, ProjectionStatus::first_delivery())
                            .await?;
                    }
                    Ok(())
                }
            }
        })
    })
}
