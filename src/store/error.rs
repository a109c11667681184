//! Store error types

use thiserror::Error;

use crate::store::types::RuleType;

/// Errors from local store lookups and materialization
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Artifact id has no live entry
    #[error("artifact {id} not found")]
    ArtifactNotFound { id: String },

    /// Create targeted an id that already exists
    #[error("artifact {id} already exists")]
    ArtifactExists { id: String },

    /// Version number absent for this artifact
    #[error("version {version} of artifact {id} not found")]
    VersionNotFound { id: String, version: u64 },

    /// No version carries this global id
    #[error("global id {global_id} not found")]
    GlobalIdNotFound { global_id: u64 },

    /// No rule of this type in the requested scope
    #[error("no {rule_type} rule configured")]
    RuleNotFound { rule_type: RuleType },

    /// A rule of this type already exists in the requested scope
    #[error("a {rule_type} rule is already configured")]
    RuleExists { rule_type: RuleType },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
