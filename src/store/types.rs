//! Core registry types
//!
//! Shared domain types for artifacts, versions, metadata, and rules. These
//! are the types that travel through the log (inside mutations) and live in
//! the per-node store, so everything here is serde-serializable.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::identity::GlobalId;

/// Content type tag for artifact versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactType {
    /// JSON schema document
    Json,
    /// Avro schema (JSON syntax)
    Avro,
    /// Protobuf schema (text syntax)
    Protobuf,
}

impl ArtifactType {
    /// Whether content of this type is JSON-syntax text
    pub fn is_json_syntax(&self) -> bool {
        matches!(self, ArtifactType::Json | ArtifactType::Avro)
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactType::Json => "JSON",
            ArtifactType::Avro => "AVRO",
            ArtifactType::Protobuf => "PROTOBUF",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JSON" => Ok(ArtifactType::Json),
            "AVRO" => Ok(ArtifactType::Avro),
            "PROTOBUF" => Ok(ArtifactType::Protobuf),
            other => Err(format!("unknown artifact type: {}", other)),
        }
    }
}

/// Kind of rule gating new versions
///
/// At most one rule of each type may exist per scope (artifact or global).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RuleType {
    /// Proposed content is checked in isolation
    Validity,
    /// Proposed content is compared against existing versions
    Compatibility,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleType::Validity => "VALIDITY",
            RuleType::Compatibility => "COMPATIBILITY",
        };
        write!(f, "{}", s)
    }
}

/// Scope a rule applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleScope {
    /// Applies to every artifact unless shadowed by an artifact-scoped rule
    Global,
    /// Applies to one artifact only
    Artifact(String),
}

/// A configured rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule kind
    pub rule_type: RuleType,
    /// Opaque configuration string interpreted by the rule's evaluator
    pub config: String,
}

/// Selects which version a metadata update targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionSelector {
    /// The highest version at apply time
    Latest,
    /// A specific version number
    Version(u64),
}

/// Mutable, caller-editable metadata on a version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditableMetadata {
    /// Human-readable name
    pub name: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Free-form labels
    pub labels: Vec<String>,
}

/// One stored artifact version
///
/// Content is immutable once written; metadata is updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Artifact-local version number, 1-based and contiguous
    pub version: u64,
    /// Store-wide unique id, derived from the creating log position
    pub global_id: GlobalId,
    /// Content type tag
    pub artifact_type: ArtifactType,
    /// Immutable content blob
    pub content: Bytes,
    /// Editable metadata
    pub metadata: EditableMetadata,
    /// Creation time in unix millis, stamped by the writing node
    pub created_on: u64,
}

/// Read-side metadata projection for one version of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Artifact id
    pub id: String,
    /// Version number
    pub version: u64,
    /// Global id
    pub global_id: GlobalId,
    /// Content type tag
    pub artifact_type: ArtifactType,
    /// Name from editable metadata
    pub name: Option<String>,
    /// Description from editable metadata
    pub description: Option<String>,
    /// Labels from editable metadata
    pub labels: Vec<String>,
    /// Creation time in unix millis
    pub created_on: u64,
}

impl ArtifactMetadata {
    /// Build the projection for `record` of artifact `id`
    pub fn from_record(id: &str, record: &VersionRecord) -> Self {
        Self {
            id: id.to_string(),
            version: record.version,
            global_id: record.global_id,
            artifact_type: record.artifact_type,
            name: record.metadata.name.clone(),
            description: record.metadata.description.clone(),
            labels: record.metadata.labels.clone(),
            created_on: record.created_on,
        }
    }
}
