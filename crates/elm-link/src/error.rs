//! Link and setup error types.

use serde::Serialize;
use thiserror::Error;

/// Errors from talking to the adapter.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("no prompt within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("adapter is not ready")]
    NotReady,

    #[error("setup failed: {0}")]
    SetupFailed(#[from] SetupFailure),

    #[error("connection closed")]
    Closed,
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        LinkError::Transport(e.to_string())
    }
}

/// Convenience alias for link results.
pub type LinkResult<T> = Result<T, LinkError>;

/// Why a setup attempt ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SetupFailure {
    #[error("{step} timed out")]
    StepTimeout { step: String },

    #[error("{step} rejected: {reply}")]
    StepRejected { step: String, reply: String },

    #[error("no protocol answered the probe")]
    NoProtocol,

    #[error("transport error: {message}")]
    Transport { message: String },
}
