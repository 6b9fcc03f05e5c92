#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strand-projector** – In-process projection dispatch for Strand.
//!
//! This crate fans persisted event records out to typed subscribers under a
//! well-defined replay policy. Records sharing a stream are dispatched
//! strictly FIFO through per-stream serial queues; across streams dispatch
//! proceeds in parallel. Subscriptions come in three replay-sensitive modes:
//!
//! * `once` – side effects that must never replay (mail, external orders);
//! * `on` – replay-safe read models that must skip obsolete events;
//! * `all` – ordering-agnostic catch-alls.
//!
//! A [`Publisher`] complements the projector with a single-handler-per-type
//! channel.

pub mod error;
pub mod projector;
pub mod publisher;
pub mod queue;

pub use error::ProjectorError;
pub use projector::{
    BatchHandler, BatchSubscription, Effects, ErrorCallback, Handler, ProjectionStatus,
    Projector, SubscriptionMode, Subscription, SuccessCallback,
};
pub use publisher::Publisher;
pub use queue::{QueuePush, QueueWorker, SerialQueue};
