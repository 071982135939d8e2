//! Error taxonomy for the alerting engine.

use thiserror::Error;

/// Errors surfaced by the engine's synchronous API.
///
/// Delivery failures are not in this taxonomy on purpose: they are handled
/// inside the dispatcher via retry/escalation and surface only as delivery
/// events, never as errors from `run_history` or `check_notifications`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input rejected before any state mutation
    #[error("validation error: {0}")]
    Validation(String),

    /// An overlapping unconfirmed silence already exists
    #[error("conflicting silences: {overlapping:?} (pass confirm to override)")]
    Conflict { overlapping: Vec<String> },

    /// Action or lookup referenced an unknown entity
    #[error("not found: {0}")]
    NotFound(String),

    /// A definition references something that does not exist
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Template rendering failed
    #[error("template render failed: {0}")]
    Template(#[from] handlebars::RenderError),

    /// State file could not be read or written
    #[error("state file error: {0}")]
    State(String),
}
