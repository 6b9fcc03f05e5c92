//! Error kinds surfaced by the dispatch layer.

/// Errors surfaced by projector-layer operations.
///
/// Mode filtering is not represented here: a delivery rejected by a
/// subscription mode is silently skipped, never an error.
#[derive(Debug, thiserror::Error)]
pub enum ProjectorError {
    /// A second handler was registered for a type on a single-handler
    /// channel.
    #[error("a handler is already subscribed for event type '{0}'")]
    DuplicateHandler(String),
}
