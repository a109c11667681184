//! Node-level error types

use thiserror::Error;

use crate::codec::EncodeError;
use crate::log::LogError;
use crate::materializer::{CheckpointError, WriteError};
use crate::rules::RuleViolation;
use crate::store::StoreError;

/// Errors surfaced by the node API
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Store lookup or materialization conflict
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Proposed version rejected by a rule
    #[error(transparent)]
    Rule(#[from] RuleViolation),

    /// Log collaborator failure
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Mutation could not be encoded
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Checkpoint store could not be opened
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Gave up waiting for local materialization; the log entry remains
    /// durable and will still be applied
    #[error("timed out waiting for position {position} to materialize")]
    Timeout { position: u64 },

    /// This node's materialization halted
    #[error("node failed at position {position}")]
    NodeFailed { position: u64 },

    /// A write completed with an outcome its operation cannot produce
    #[error("unexpected apply outcome")]
    UnexpectedOutcome,

    /// The node is shut down
    #[error("node is shut down")]
    Closed,
}

impl From<WriteError> for RegistryError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::Store(e) => RegistryError::Store(e),
            WriteError::Rule(e) => RegistryError::Rule(e),
        }
    }
}

/// Result type for node operations
pub type RegistryResult<T> = Result<T, RegistryError>;
