//! Decode error types.

use thiserror::Error;

use crate::tokens::ErrorToken;

/// Reasons a requested command produced no measurement.
///
/// Decode errors are always scoped to a single command: the decoder turns
/// them into `Measurement::NoResult` and keeps going with its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("adapter reported {0}")]
    AdapterError(ErrorToken),

    #[error("echo {mode:02X} {pid:02X} matches no requested command")]
    EchoMismatch { mode: u8, pid: u8 },

    #[error("truncated payload for {mode:02X}{pid:02X}: need {need} bytes, got {got}")]
    Truncated {
        mode: u8,
        pid: u8,
        need: usize,
        got: usize,
    },

    #[error("multi-frame message from {header} missing fragment {index}")]
    MissingFragment { header: String, index: usize },

    #[error("malformed line: {0}")]
    Malformed(String),

    #[error("no response for command")]
    NoResponse,

    /// The transaction carrying the command got no prompt in time.
    #[error("no reply within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

/// Convenience alias for decode results.
pub type DecodeResult<T> = Result<T, DecodeError>;
