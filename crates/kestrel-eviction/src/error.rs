// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Eviction error type
#[derive(Error, Debug, Diagnostic)]
pub enum EvictionError {
    /// The manager task is no longer running
    #[error("Eviction manager is not running")]
    #[diagnostic(
        code(eviction::manager_stopped),
        help("The manager was shut down or its task panicked; restart it before sending updates")
    )]
    ManagerStopped,

    /// A timer was asked to leave a terminal state
    #[error("Invalid transition for timer {timer}: {from} -> {to}")]
    #[diagnostic(
        code(eviction::invalid_transition),
        help("Only Armed timers can be cancelled or fired")
    )]
    InvalidTransition {
        timer: String,
        from: String,
        to: String,
    },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(code(eviction::core_error), help("This is an internal error"))]
    CoreError(#[from] kestrel_core::KestrelError),
}

/// Result type alias for eviction operations
pub type Result<T> = std::result::Result<T, EvictionError>;

impl EvictionError {
    pub fn invalid_transition(
        timer: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            timer: timer.into(),
            from: from.into(),
            to: to.into(),
        }
    }
}
