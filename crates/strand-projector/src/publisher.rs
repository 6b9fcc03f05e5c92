//! Single-handler-per-type dispatch channel.
//!
//! Unlike the projector, which fans a record out to any number of
//! subscribers, a publisher routes each event type to at most one handler
//! and rejects a second subscription for the same type.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::Value;

use strand_store_core::EventRecord;

use crate::error::ProjectorError;
use crate::projector::Handler;

/// Single-handler dispatch channel keyed by event type.
#[derive(Clone, Default)]
pub struct Publisher {
    handlers: Arc<Mutex<HashMap<String, Handler>>>,
}

impl Publisher {
    /// Create a publisher with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `kind`.
    ///
    /// Fails with [`ProjectorError::DuplicateHandler`] when a handler is
    /// already registered for the type.
    pub fn subscribe<F, Fut>(&self, kind: &str, handler: F) -> Result<(), ProjectorError>
    where
        F: Fn(EventRecord) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        let mut handlers = self.handlers.lock().expect("handler map poisoned");
        if handlers.contains_key(kind) {
            return Err(ProjectorError::DuplicateHandler(kind.to_owned()));
        }
        let handler: Handler = Arc::new(move |record| Box::pin(handler(record)));
        handlers.insert(kind.to_owned(), handler);
        Ok(())
    }

    /// Remove the handler for `kind`, freeing the slot.
    pub fn unsubscribe(&self, kind: &str) {
        self.handlers
            .lock()
            .expect("handler map poisoned")
            .remove(kind);
    }

    /// Run the handler registered for the record's type, if any.
    ///
    /// Returns whether a handler ran; handler failures surface to the
    /// caller.
    pub async fn publish(&self, record: EventRecord) -> Result<bool> {
        let handler = {
            let handlers = self.handlers.lock().expect("handler map poisoned");
            handlers.get(&record.kind).map(Arc::clone)
        };
        match handler {
            Some(handler) => {
                handler(record).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
