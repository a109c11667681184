//! Registry mutations
//!
//! Every state change in the registry is one of these operations, written to
//! the shared log and applied by each node's materializer. Timestamps are
//! stamped by the writing node and carried in the mutation so that applying
//! the same entry on any node (or replaying it) produces identical state.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::error::DecodeError;
use crate::store::types::{ArtifactType, EditableMetadata, RuleScope, RuleType, VersionSelector};

/// Partition key used for mutations with no owning artifact (global rules)
pub const GLOBAL_PARTITION_KEY: &str = "__global__";

/// Mutation kind discriminator carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MutationKind {
    /// Create an artifact with its first version
    CreateArtifact = 1,
    /// Append a version to an existing artifact
    AddVersion = 2,
    /// Update editable metadata on a version
    UpdateMetadata = 3,
    /// Create a rule for a scope
    SetRule = 4,
    /// Delete a rule from a scope
    DeleteRule = 5,
    /// Tombstone an artifact with all its versions and rules
    DeleteArtifact = 6,
}

impl TryFrom<u8> for MutationKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::CreateArtifact),
            2 => Ok(Self::AddVersion),
            3 => Ok(Self::UpdateMetadata),
            4 => Ok(Self::SetRule),
            5 => Ok(Self::DeleteRule),
            6 => Ok(Self::DeleteArtifact),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }
}

/// Create an artifact and its version 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateArtifact {
    /// Externally supplied artifact id
    pub artifact_id: String,
    /// Content type tag
    pub artifact_type: ArtifactType,
    /// Version 1 content
    pub content: Bytes,
    /// Creation time in unix millis
    pub created_on: u64,
}

/// Append the next version to an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddVersion {
    /// Target artifact id
    pub artifact_id: String,
    /// New version content
    pub content: Bytes,
    /// Creation time in unix millis
    pub created_on: u64,
}

/// Replace editable metadata on one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMetadata {
    /// Target artifact id
    pub artifact_id: String,
    /// Which version to update
    pub selector: VersionSelector,
    /// New metadata
    pub metadata: EditableMetadata,
}

/// Create a rule for an artifact or the global scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRule {
    /// Rule scope
    pub scope: RuleScope,
    /// Rule kind
    pub rule_type: RuleType,
    /// Opaque evaluator configuration
    pub config: String,
}

/// Delete a rule from an artifact or the global scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRule {
    /// Rule scope
    pub scope: RuleScope,
    /// Rule kind
    pub rule_type: RuleType,
}

/// Tombstone an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteArtifact {
    /// Target artifact id
    pub artifact_id: String,
}

/// A registry mutation as carried through the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateArtifact(CreateArtifact),
    AddVersion(AddVersion),
    UpdateMetadata(UpdateMetadata),
    SetRule(SetRule),
    DeleteRule(DeleteRule),
    DeleteArtifact(DeleteArtifact),
}

impl Mutation {
    /// Kind discriminator for the frame header
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::CreateArtifact(_) => MutationKind::CreateArtifact,
            Mutation::AddVersion(_) => MutationKind::AddVersion,
            Mutation::UpdateMetadata(_) => MutationKind::UpdateMetadata,
            Mutation::SetRule(_) => MutationKind::SetRule,
            Mutation::DeleteRule(_) => MutationKind::DeleteRule,
            Mutation::DeleteArtifact(_) => MutationKind::DeleteArtifact,
        }
    }

    /// Partition key for the log append
    ///
    /// Entries affecting the same artifact must share a key so a partitioned
    /// log keeps them ordered relative to each other.
    pub fn partition_key(&self) -> &str {
        match self {
            Mutation::CreateArtifact(m) => &m.artifact_id,
            Mutation::AddVersion(m) => &m.artifact_id,
            Mutation::UpdateMetadata(m) => &m.artifact_id,
            Mutation::SetRule(m) => scope_key(&m.scope),
            Mutation::DeleteRule(m) => scope_key(&m.scope),
            Mutation::DeleteArtifact(m) => &m.artifact_id,
        }
    }
}

fn scope_key(scope: &RuleScope) -> &str {
    match scope {
        RuleScope::Global => GLOBAL_PARTITION_KEY,
        RuleScope::Artifact(id) => id,
    }
}
