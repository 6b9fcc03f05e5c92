//! Reducers fold an ordered event list into a state.
//!
//! The engine knows two shapes: a plain fold over a state value
//! ([`FoldReducer`]) and an aggregate-backed fold that instantiates a domain
//! object and applies events through its `with` method
//! ([`AggregateReducer`]). Both are named; the name keys the reducer's
//! snapshots.

use std::marker::PhantomData;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use strand_store_core::EventRecord;

use crate::aggregate::Aggregate;

/// A named fold of an ordered event list into a state.
///
/// `reduce` receives events sorted ascending by `created`; this is the
/// engine's contract with every reducer.
pub trait Reducer: Send + Sync {
    /// The folded state. Serializability is what makes snapshots possible.
    type State: Serialize + DeserializeOwned + Send;

    /// Reducer name; keys this reducer's snapshots.
    fn name(&self) -> &str;

    /// Revive a state from its snapshot form.
    fn from_snapshot(&self, state: Value) -> Result<Self::State> {
        Ok(serde_json::from_value(state)?)
    }

    /// Fold `events` onto `seed`, or onto the default state when no seed is
    /// given.
    fn reduce(&self, events: Vec<EventRecord>, seed: Option<Self::State>) -> Result<Self::State>;
}

/// Fold reducer over an explicit initial-state function and step function.
///
/// ```
/// use strand_engine::FoldReducer;
/// use strand_store_core::EventRecord;
///
/// let count = FoldReducer::new(
///     "event-count",
///     || 0u64,
///     |state: &mut u64, _record: &EventRecord| {
///         *state += 1;
///         Ok(())
///     },
/// );
/// ```
pub struct FoldReducer<S, F> {
    name: String,
    init: Box<dyn Fn() -> S + Send + Sync>,
    step: F,
}

impl<S, F> FoldReducer<S, F>
where
    S: Serialize + DeserializeOwned + Send,
    F: Fn(&mut S, &EventRecord) -> Result<()> + Send + Sync,
{
    /// Build a fold reducer.
    pub fn new(
        name: impl Into<String>,
        init: impl Fn() -> S + Send + Sync + 'static,
        step: F,
    ) -> Self {
        Self {
            name: name.into(),
            init: Box::new(init),
            step,
        }
    }
}

impl<S, F> Reducer for FoldReducer<S, F>
where
    S: Serialize + DeserializeOwned + Send,
    F: Fn(&mut S, &EventRecord) -> Result<()> + Send + Sync,
{
    type State = S;

    fn name(&self) -> &str {
        &self.name
    }

    fn reduce(&self, events: Vec<EventRecord>, seed: Option<S>) -> Result<S> {
        let mut state = seed.unwrap_or_else(|| (self.init)());
        for event in &events {
            (self.step)(&mut state, event)?;
        }
        Ok(state)
    }
}

/// Aggregate-backed reducer: instantiates the aggregate (optionally seeded
/// from a snapshot) and applies `with` per event.
pub struct AggregateReducer<A> {
    _marker: PhantomData<fn() -> A>,
}

impl<A> Default for AggregateReducer<A> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<A> AggregateReducer<A> {
    /// Build the reducer for aggregate type `A`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A: Aggregate> Reducer for AggregateReducer<A> {
    type State = A;

    fn name(&self) -> &str {
        A::name()
    }

    fn reduce(&self, events: Vec<EventRecord>, seed: Option<A>) -> Result<A> {
        let mut state = seed.unwrap_or_default();
        for event in &events {
            state.with(event)?;
        }
        Ok(state)
    }
}
