//! Engine error taxonomy.
//!
//! `IllegalTransition` and `InvalidState` are defect signals: they only occur
//! when a caller misuses the engine (e.g. appending to a finished run).
//! Recoverable executor failures are [`crate::executor::StepError`], not engine errors.

use thiserror::Error;

use crate::core::types::RunStatus;

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Request shape rejected before any run is created.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Lifecycle edge or run-only mutation attempted in the wrong status.
    #[error("illegal transition from {from}: {attempted}")]
    IllegalTransition {
        from: RunStatus,
        attempted: String,
    },

    /// Operation on a run whose state forbids it (e.g. appending after a terminal status).
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("run not found: {0}")]
    NotFound(String),
}
