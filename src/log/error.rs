//! Log error types

use thiserror::Error;

/// Errors from the entry log collaborator
#[derive(Error, Debug)]
pub enum LogError {
    /// Append could not be accepted right now; safe to retry with backoff
    #[error("append failed: {0}")]
    Append(String),

    /// Subscription start position is past the head
    #[error("position {from} out of range (head {head})")]
    OutOfRange { from: u64, head: u64 },

    /// Stream delivery failure
    #[error("stream error: {0}")]
    Stream(String),

    /// Log is closed
    #[error("log is closed")]
    Closed,
}

/// Result type for log operations
pub type LogResult<T> = Result<T, LogError>;
