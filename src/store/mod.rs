//! Local store - per-node projection of the log
//!
//! Each node materializes the shared log into one of these. The store maps
//! artifact ids to their ordered version lists and rules, keeps a global-id
//! lookup table, and records the highest applied log position (the
//! idempotency key for re-delivered entries).
//!
//! All mutation goes through the materializer, which is the single writer;
//! the `pub(crate)` mutators enforce that at the module boundary. Readers
//! take the lock per call and never observe a half-applied entry.

pub mod error;
pub mod types;

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::identity::GlobalId;
pub use error::{StoreError, StoreResult};
use types::{
    ArtifactMetadata, ArtifactType, EditableMetadata, Rule, RuleScope, RuleType, VersionRecord,
    VersionSelector,
};

/// One artifact's materialized state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ArtifactEntry {
    /// Versions in creation order; index i holds version i+1
    versions: Vec<VersionRecord>,
    /// Artifact-scoped rules
    rules: BTreeMap<RuleType, String>,
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Live artifacts
    artifacts: HashMap<String, ArtifactEntry>,
    /// Global id -> (artifact id, version number)
    global_ids: BTreeMap<GlobalId, (String, u64)>,
    /// Global-scoped rules
    global_rules: BTreeMap<RuleType, String>,
    /// Highest applied log position
    last_applied: u64,
}

/// Serializable snapshot of the store, paired with its log position
///
/// The global-id table is derived state and is rebuilt on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Log position the snapshot reflects
    pub last_applied: u64,
    artifacts: HashMap<String, ArtifactEntry>,
    global_rules: BTreeMap<RuleType, String>,
}

/// Per-node registry projection
#[derive(Debug, Default)]
pub struct RegistryStore {
    inner: RwLock<StoreInner>,
}

impl RegistryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    // ---- readers ----

    /// Highest applied log position (0 before the first entry)
    pub fn last_applied(&self) -> u64 {
        self.inner.read().last_applied
    }

    /// Whether an artifact id has a live entry
    pub fn contains_artifact(&self, id: &str) -> bool {
        self.inner.read().artifacts.contains_key(id)
    }

    /// All live artifact ids, sorted
    pub fn list_artifacts(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner.artifacts.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Latest version of an artifact
    pub fn latest_version(&self, id: &str) -> StoreResult<VersionRecord> {
        let inner = self.inner.read();
        let entry = inner
            .artifacts
            .get(id)
            .ok_or_else(|| StoreError::ArtifactNotFound { id: id.to_string() })?;
        entry
            .versions
            .last()
            .cloned()
            .ok_or_else(|| StoreError::ArtifactNotFound { id: id.to_string() })
    }

    /// A specific version of an artifact
    pub fn get_version(&self, id: &str, version: u64) -> StoreResult<VersionRecord> {
        let inner = self.inner.read();
        let entry = inner
            .artifacts
            .get(id)
            .ok_or_else(|| StoreError::ArtifactNotFound { id: id.to_string() })?;
        version
            .checked_sub(1)
            .and_then(|i| entry.versions.get(i as usize))
            .cloned()
            .ok_or(StoreError::VersionNotFound {
                id: id.to_string(),
                version,
            })
    }

    /// Resolve a global id to its artifact and version record
    pub fn version_by_global_id(&self, global_id: GlobalId) -> StoreResult<(String, VersionRecord)> {
        let inner = self.inner.read();
        let (id, version) =
            inner
                .global_ids
                .get(&global_id)
                .cloned()
                .ok_or(StoreError::GlobalIdNotFound {
                    global_id: global_id.as_u64(),
                })?;
        let record = inner
            .artifacts
            .get(&id)
            .and_then(|e| e.versions.get((version - 1) as usize))
            .cloned()
            .ok_or(StoreError::GlobalIdNotFound {
                global_id: global_id.as_u64(),
            })?;
        Ok((id, record))
    }

    /// Version numbers of an artifact in creation order
    pub fn list_versions(&self, id: &str) -> StoreResult<Vec<u64>> {
        let inner = self.inner.read();
        let entry = inner
            .artifacts
            .get(id)
            .ok_or_else(|| StoreError::ArtifactNotFound { id: id.to_string() })?;
        Ok(entry.versions.iter().map(|v| v.version).collect())
    }

    /// All versions of an artifact (history for compatibility checks)
    pub fn versions_of(&self, id: &str) -> Vec<VersionRecord> {
        let inner = self.inner.read();
        inner
            .artifacts
            .get(id)
            .map(|e| e.versions.clone())
            .unwrap_or_default()
    }

    /// Metadata projection for the latest version
    pub fn artifact_metadata(&self, id: &str) -> StoreResult<ArtifactMetadata> {
        let record = self.latest_version(id)?;
        Ok(ArtifactMetadata::from_record(id, &record))
    }

    /// An artifact-scoped rule
    pub fn artifact_rule(&self, id: &str, rule_type: RuleType) -> StoreResult<Rule> {
        let inner = self.inner.read();
        let entry = inner
            .artifacts
            .get(id)
            .ok_or_else(|| StoreError::ArtifactNotFound { id: id.to_string() })?;
        entry
            .rules
            .get(&rule_type)
            .map(|config| Rule {
                rule_type,
                config: config.clone(),
            })
            .ok_or(StoreError::RuleNotFound { rule_type })
    }

    /// Types of the rules configured on an artifact, sorted
    pub fn list_artifact_rules(&self, id: &str) -> StoreResult<Vec<RuleType>> {
        let inner = self.inner.read();
        let entry = inner
            .artifacts
            .get(id)
            .ok_or_else(|| StoreError::ArtifactNotFound { id: id.to_string() })?;
        Ok(entry.rules.keys().copied().collect())
    }

    /// Artifact-scoped rules as a config map (empty when absent)
    pub fn artifact_rules_map(&self, id: &str) -> BTreeMap<RuleType, String> {
        let inner = self.inner.read();
        inner
            .artifacts
            .get(id)
            .map(|e| e.rules.clone())
            .unwrap_or_default()
    }

    /// A global-scoped rule
    pub fn global_rule(&self, rule_type: RuleType) -> StoreResult<Rule> {
        let inner = self.inner.read();
        inner
            .global_rules
            .get(&rule_type)
            .map(|config| Rule {
                rule_type,
                config: config.clone(),
            })
            .ok_or(StoreError::RuleNotFound { rule_type })
    }

    /// Types of the configured global rules, sorted
    pub fn list_global_rules(&self) -> Vec<RuleType> {
        self.inner.read().global_rules.keys().copied().collect()
    }

    /// Global rules as a config map
    pub fn global_rules_map(&self) -> BTreeMap<RuleType, String> {
        self.inner.read().global_rules.clone()
    }

    /// Latest version of every live artifact (search index rebuild)
    pub fn latest_versions(&self) -> Vec<(String, VersionRecord)> {
        let inner = self.inner.read();
        inner
            .artifacts
            .iter()
            .filter_map(|(id, entry)| {
                entry.versions.last().map(|v| (id.clone(), v.clone()))
            })
            .collect()
    }

    /// Snapshot the store for checkpointing
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read();
        StoreSnapshot {
            last_applied: inner.last_applied,
            artifacts: inner.artifacts.clone(),
            global_rules: inner.global_rules.clone(),
        }
    }

    // ---- mutators (materializer only) ----

    /// Replace the store contents from a snapshot
    pub(crate) fn restore(&self, snapshot: StoreSnapshot) {
        let mut global_ids = BTreeMap::new();
        for (id, entry) in &snapshot.artifacts {
            for record in &entry.versions {
                global_ids.insert(record.global_id, (id.clone(), record.version));
            }
        }

        let mut inner = self.inner.write();
        inner.artifacts = snapshot.artifacts;
        inner.global_rules = snapshot.global_rules;
        inner.global_ids = global_ids;
        inner.last_applied = snapshot.last_applied;
    }

    /// Create an artifact with its version 1
    pub(crate) fn apply_create(
        &self,
        id: &str,
        artifact_type: ArtifactType,
        content: Bytes,
        global_id: GlobalId,
        created_on: u64,
    ) -> StoreResult<VersionRecord> {
        let mut inner = self.inner.write();
        if inner.artifacts.contains_key(id) {
            return Err(StoreError::ArtifactExists { id: id.to_string() });
        }

        let record = VersionRecord {
            version: 1,
            global_id,
            artifact_type,
            content,
            metadata: EditableMetadata::default(),
            created_on,
        };
        inner.artifacts.insert(
            id.to_string(),
            ArtifactEntry {
                versions: vec![record.clone()],
                rules: BTreeMap::new(),
            },
        );
        inner.global_ids.insert(global_id, (id.to_string(), 1));
        Ok(record)
    }

    /// Append the next version to an artifact
    pub(crate) fn apply_add_version(
        &self,
        id: &str,
        content: Bytes,
        global_id: GlobalId,
        created_on: u64,
    ) -> StoreResult<VersionRecord> {
        let mut inner = self.inner.write();
        let entry = inner
            .artifacts
            .get_mut(id)
            .ok_or_else(|| StoreError::ArtifactNotFound { id: id.to_string() })?;

        let artifact_type = entry
            .versions
            .last()
            .map(|v| v.artifact_type)
            .ok_or_else(|| StoreError::ArtifactNotFound { id: id.to_string() })?;
        let version = entry.versions.len() as u64 + 1;

        let record = VersionRecord {
            version,
            global_id,
            artifact_type,
            content,
            metadata: EditableMetadata::default(),
            created_on,
        };
        entry.versions.push(record.clone());
        inner.global_ids.insert(global_id, (id.to_string(), version));
        Ok(record)
    }

    /// Replace editable metadata on the selected version
    pub(crate) fn apply_update_metadata(
        &self,
        id: &str,
        selector: VersionSelector,
        metadata: EditableMetadata,
    ) -> StoreResult<VersionRecord> {
        let mut inner = self.inner.write();
        let entry = inner
            .artifacts
            .get_mut(id)
            .ok_or_else(|| StoreError::ArtifactNotFound { id: id.to_string() })?;

        let record = match selector {
            VersionSelector::Latest => entry.versions.last_mut(),
            VersionSelector::Version(n) => n
                .checked_sub(1)
                .and_then(|i| entry.versions.get_mut(i as usize)),
        };
        let record = record.ok_or(StoreError::VersionNotFound {
            id: id.to_string(),
            version: match selector {
                VersionSelector::Latest => 0,
                VersionSelector::Version(n) => n,
            },
        })?;

        record.metadata = metadata;
        Ok(record.clone())
    }

    /// Create a rule; fails if the scope already has one of this type
    pub(crate) fn apply_set_rule(
        &self,
        scope: &RuleScope,
        rule_type: RuleType,
        config: String,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let rules = match scope {
            RuleScope::Global => &mut inner.global_rules,
            RuleScope::Artifact(id) => {
                &mut inner
                    .artifacts
                    .get_mut(id)
                    .ok_or_else(|| StoreError::ArtifactNotFound { id: id.clone() })?
                    .rules
            }
        };
        if rules.contains_key(&rule_type) {
            return Err(StoreError::RuleExists { rule_type });
        }
        rules.insert(rule_type, config);
        Ok(())
    }

    /// Delete a rule from a scope
    pub(crate) fn apply_delete_rule(
        &self,
        scope: &RuleScope,
        rule_type: RuleType,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let rules = match scope {
            RuleScope::Global => &mut inner.global_rules,
            RuleScope::Artifact(id) => {
                &mut inner
                    .artifacts
                    .get_mut(id)
                    .ok_or_else(|| StoreError::ArtifactNotFound { id: id.clone() })?
                    .rules
            }
        };
        rules
            .remove(&rule_type)
            .map(|_| ())
            .ok_or(StoreError::RuleNotFound { rule_type })
    }

    /// Tombstone an artifact with its versions and rules
    pub(crate) fn apply_delete_artifact(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .artifacts
            .remove(id)
            .ok_or_else(|| StoreError::ArtifactNotFound { id: id.to_string() })?;
        for record in &entry.versions {
            inner.global_ids.remove(&record.global_id);
        }
        Ok(())
    }

    /// Record that `position` has been applied (or skipped as a no-op)
    pub(crate) fn advance_applied(&self, position: u64) {
        self.inner.write().last_applied = position;
    }
}
