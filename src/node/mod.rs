//! Registry node
//!
//! `RegistryNode` is the API surface one process exposes to its REST/RPC
//! layer: write operations encode a mutation and append it to the shared
//! log, read operations hit the node's local store and search index
//! directly. Reads may lag the log head; a caller that needs to observe its
//! own write either awaits the returned `PendingWrite` (local
//! materialization) or polls, and cross-node visibility is eventual.

pub mod error;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

use crate::codec::{
    self, AddVersion, CreateArtifact, DeleteArtifact, DeleteRule, Mutation, SetRule,
    UpdateMetadata,
};
use crate::identity::GlobalId;
use crate::log::{EntryLog, LogError};
use crate::materializer::{
    Applied, ApplyOutcome, CheckpointStore, CompletionHub, FileCheckpoint, Materializer,
    MaterializerConfig, MaterializerHandle, MemCheckpoint, NodeStatus,
};
use crate::rules::RuleEngine;
use crate::search::{SearchIndex, SearchResults, SearchScope, SortBy, SortOrder};
use crate::store::types::{
    ArtifactMetadata, ArtifactType, EditableMetadata, Rule, RuleScope, RuleType, VersionRecord,
    VersionSelector,
};
use crate::store::RegistryStore;

pub use error::{RegistryError, RegistryResult};

/// Backoff policy for transient log append failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Initial delay, doubled per attempt
    pub base_delay: Duration,
    /// Delay ceiling
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Node identifier, used in log output only
    pub node_id: u64,
    /// Checkpoint file; `None` keeps checkpoints in memory
    pub checkpoint_path: Option<PathBuf>,
    /// Materializer tuning
    pub materializer: MaterializerConfig,
    /// Append retry policy
    pub append_retry: RetryConfig,
}

/// A write accepted by the log, not yet materialized locally
///
/// The log append has succeeded by the time one of these exists: the write
/// is durable and every node will apply it. `wait` only waits for the
/// *local* materialization so the outcome (metadata or rejection) can be
/// reported; dropping or timing out never rolls anything back.
pub struct PendingWrite {
    position: u64,
    artifact_id: Option<String>,
    rx: oneshot::Receiver<ApplyOutcome>,
}

impl PendingWrite {
    /// Log position assigned to the write
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Artifact id the write targets (generated ids included)
    pub fn artifact_id(&self) -> Option<&str> {
        self.artifact_id.as_deref()
    }

    /// Wait for local materialization
    pub async fn wait(self, timeout: Duration) -> RegistryResult<Applied> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(outcome)) => outcome.map_err(RegistryError::from),
            Ok(Err(_)) => Err(RegistryError::Closed),
            Err(_) => Err(RegistryError::Timeout {
                position: self.position,
            }),
        }
    }

    /// Wait for local materialization of a version-creating write
    pub async fn wait_metadata(self, timeout: Duration) -> RegistryResult<ArtifactMetadata> {
        match self.wait(timeout).await? {
            Applied::Version(meta) => Ok(meta),
            Applied::None => Err(RegistryError::UnexpectedOutcome),
        }
    }
}

/// One registry node: a materializer plus the query surface over its state
pub struct RegistryNode {
    node_id: u64,
    log: Arc<dyn EntryLog>,
    store: Arc<RegistryStore>,
    index: Arc<RwLock<SearchIndex>>,
    hub: Arc<CompletionHub>,
    retry: RetryConfig,
    status_rx: watch::Receiver<NodeStatus>,
    handle: Option<MaterializerHandle>,
}

impl RegistryNode {
    /// Start a node with the default rule engine
    ///
    /// Must be called within a tokio runtime; the materializer task starts
    /// immediately. Use [`RegistryNode::wait_ready`] before serving reads.
    pub fn start(config: NodeConfig, log: Arc<dyn EntryLog>) -> RegistryResult<Self> {
        let checkpoint: Box<dyn CheckpointStore> = match &config.checkpoint_path {
            Some(path) => Box::new(FileCheckpoint::new(path)?),
            None => Box::new(MemCheckpoint::new()),
        };
        Self::start_custom(config, log, checkpoint, Arc::new(RuleEngine::with_defaults()))
    }

    /// Start a node with explicit checkpoint store and rule engine
    pub fn start_custom(
        config: NodeConfig,
        log: Arc<dyn EntryLog>,
        checkpoint: Box<dyn CheckpointStore>,
        engine: Arc<RuleEngine>,
    ) -> RegistryResult<Self> {
        let store = Arc::new(RegistryStore::new());
        let index = Arc::new(RwLock::new(SearchIndex::new()));
        let hub = Arc::new(CompletionHub::new());

        let handle = Materializer::spawn(
            config.node_id,
            log.clone(),
            store.clone(),
            index.clone(),
            engine,
            checkpoint,
            hub.clone(),
            config.materializer.clone(),
        );
        let status_rx = handle.status();

        tracing::info!(node_id = config.node_id, "Registry node started");

        Ok(Self {
            node_id: config.node_id,
            log,
            store,
            index,
            hub,
            retry: config.append_retry,
            status_rx,
            handle: Some(handle),
        })
    }

    /// Node identifier
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    // ---- readiness ----

    /// Whether bootstrap replay has completed
    pub fn ready(&self) -> bool {
        self.status_rx.borrow().is_ready()
    }

    /// Watch the node status
    pub fn status(&self) -> watch::Receiver<NodeStatus> {
        self.status_rx.clone()
    }

    /// Wait until the node is ready to serve reads
    pub async fn wait_ready(&self) -> RegistryResult<()> {
        let mut rx = self.status_rx.clone();
        loop {
            let status = *rx.borrow();
            if status.is_ready() {
                return Ok(());
            }
            if let NodeStatus::Failed { position } = status {
                return Err(RegistryError::NodeFailed { position });
            }
            rx.changed().await.map_err(|_| RegistryError::Closed)?;
        }
    }

    // ---- writes ----

    /// Create an artifact; a missing id gets a generated UUID
    pub async fn create_artifact(
        &self,
        artifact_id: Option<String>,
        artifact_type: ArtifactType,
        content: Bytes,
    ) -> RegistryResult<PendingWrite> {
        let artifact_id = artifact_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.submit(Mutation::CreateArtifact(CreateArtifact {
            artifact_id,
            artifact_type,
            content,
            created_on: now_millis(),
        }))
        .await
    }

    /// Append a version to an existing artifact
    pub async fn add_version(
        &self,
        artifact_id: impl Into<String>,
        content: Bytes,
    ) -> RegistryResult<PendingWrite> {
        self.submit(Mutation::AddVersion(AddVersion {
            artifact_id: artifact_id.into(),
            content,
            created_on: now_millis(),
        }))
        .await
    }

    /// Replace editable metadata on the selected version
    pub async fn update_metadata(
        &self,
        artifact_id: impl Into<String>,
        selector: VersionSelector,
        metadata: EditableMetadata,
    ) -> RegistryResult<PendingWrite> {
        self.submit(Mutation::UpdateMetadata(UpdateMetadata {
            artifact_id: artifact_id.into(),
            selector,
            metadata,
        }))
        .await
    }

    /// Create an artifact-scoped rule
    pub async fn set_rule(
        &self,
        artifact_id: impl Into<String>,
        rule_type: RuleType,
        config: impl Into<String>,
    ) -> RegistryResult<PendingWrite> {
        self.submit(Mutation::SetRule(SetRule {
            scope: RuleScope::Artifact(artifact_id.into()),
            rule_type,
            config: config.into(),
        }))
        .await
    }

    /// Create a global rule
    pub async fn set_global_rule(
        &self,
        rule_type: RuleType,
        config: impl Into<String>,
    ) -> RegistryResult<PendingWrite> {
        self.submit(Mutation::SetRule(SetRule {
            scope: RuleScope::Global,
            rule_type,
            config: config.into(),
        }))
        .await
    }

    /// Delete an artifact-scoped rule
    pub async fn delete_rule(
        &self,
        artifact_id: impl Into<String>,
        rule_type: RuleType,
    ) -> RegistryResult<PendingWrite> {
        self.submit(Mutation::DeleteRule(DeleteRule {
            scope: RuleScope::Artifact(artifact_id.into()),
            rule_type,
        }))
        .await
    }

    /// Delete a global rule
    pub async fn delete_global_rule(&self, rule_type: RuleType) -> RegistryResult<PendingWrite> {
        self.submit(Mutation::DeleteRule(DeleteRule {
            scope: RuleScope::Global,
            rule_type,
        }))
        .await
    }

    /// Tombstone an artifact with its versions and rules
    pub async fn delete_artifact(
        &self,
        artifact_id: impl Into<String>,
    ) -> RegistryResult<PendingWrite> {
        self.submit(Mutation::DeleteArtifact(DeleteArtifact {
            artifact_id: artifact_id.into(),
        }))
        .await
    }

    // ---- reads ----

    /// Latest content of an artifact
    pub fn get_artifact(&self, artifact_id: &str) -> RegistryResult<Bytes> {
        Ok(self.store.latest_version(artifact_id)?.content)
    }

    /// Metadata of the latest version
    pub fn get_artifact_metadata(&self, artifact_id: &str) -> RegistryResult<ArtifactMetadata> {
        Ok(self.store.artifact_metadata(artifact_id)?)
    }

    /// A specific version
    pub fn get_version(&self, artifact_id: &str, version: u64) -> RegistryResult<VersionRecord> {
        Ok(self.store.get_version(artifact_id, version)?)
    }

    /// Resolve a global id to its artifact id and version record
    pub fn get_version_by_global_id(
        &self,
        global_id: u64,
    ) -> RegistryResult<(String, VersionRecord)> {
        Ok(self.store.version_by_global_id(GlobalId::new(global_id))?)
    }

    /// Metadata of the version carrying a global id
    pub fn get_metadata_by_global_id(&self, global_id: u64) -> RegistryResult<ArtifactMetadata> {
        let (artifact_id, record) = self.store.version_by_global_id(GlobalId::new(global_id))?;
        Ok(ArtifactMetadata::from_record(&artifact_id, &record))
    }

    /// All live artifact ids, sorted
    pub fn list_artifacts(&self) -> Vec<String> {
        self.store.list_artifacts()
    }

    /// Version numbers of an artifact in creation order
    pub fn list_versions(&self, artifact_id: &str) -> RegistryResult<Vec<u64>> {
        Ok(self.store.list_versions(artifact_id)?)
    }

    /// An artifact-scoped rule
    pub fn get_rule(&self, artifact_id: &str, rule_type: RuleType) -> RegistryResult<Rule> {
        Ok(self.store.artifact_rule(artifact_id, rule_type)?)
    }

    /// Types of the rules configured on an artifact
    pub fn list_rules(&self, artifact_id: &str) -> RegistryResult<Vec<RuleType>> {
        Ok(self.store.list_artifact_rules(artifact_id)?)
    }

    /// A global rule
    pub fn get_global_rule(&self, rule_type: RuleType) -> RegistryResult<Rule> {
        Ok(self.store.global_rule(rule_type)?)
    }

    /// Types of the configured global rules
    pub fn list_global_rules(&self) -> Vec<RuleType> {
        self.store.list_global_rules()
    }

    /// Paginated search over the node's index
    pub fn search_artifacts(
        &self,
        term: &str,
        offset: usize,
        limit: usize,
        scope: SearchScope,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> SearchResults {
        self.index
            .read()
            .query(term, scope, offset, limit, sort_by, sort_order)
    }

    // ---- lifecycle ----

    /// Stop the materializer and persist its final checkpoint
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
        }
        tracing::info!(node_id = self.node_id, "Registry node stopped");
    }

    // ---- internals ----

    async fn submit(&self, mutation: Mutation) -> RegistryResult<PendingWrite> {
        let artifact_id = match &mutation {
            Mutation::CreateArtifact(m) => Some(m.artifact_id.clone()),
            Mutation::AddVersion(m) => Some(m.artifact_id.clone()),
            Mutation::UpdateMetadata(m) => Some(m.artifact_id.clone()),
            Mutation::DeleteArtifact(m) => Some(m.artifact_id.clone()),
            Mutation::SetRule(_) | Mutation::DeleteRule(_) => None,
        };
        let key = mutation.partition_key().to_string();
        let payload = Bytes::from(codec::encode(&mutation)?);

        let position = self.append_with_retry(&key, payload).await?;
        let rx = self.hub.register(position);

        Ok(PendingWrite {
            position,
            artifact_id,
            rx,
        })
    }

    async fn append_with_retry(&self, key: &str, payload: Bytes) -> RegistryResult<u64> {
        let mut delay = self.retry.base_delay;
        let mut attempt = 1u32;
        loop {
            match self.log.append(key, payload.clone()).await {
                Ok(position) => return Ok(position),
                Err(LogError::Append(reason)) if attempt < self.retry.max_attempts => {
                    tracing::warn!(
                        node_id = self.node_id,
                        attempt,
                        error = %reason,
                        "Append failed, retrying"
                    );
                    let jitter_ceiling = (delay.as_millis() as u64 / 2).max(1);
                    let jitter = rand::thread_rng().gen_range(0..jitter_ceiling);
                    tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                    delay = (delay * 2).min(self.retry.max_delay);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::log::MemLog;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_node(log: &Arc<MemLog>, node_id: u64) -> RegistryNode {
        let log: Arc<dyn EntryLog> = log.clone();
        RegistryNode::start(
            NodeConfig {
                node_id,
                ..Default::default()
            },
            log,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let log = Arc::new(MemLog::new());
        let node = test_node(&log, 1);
        node.wait_ready().await.unwrap();

        let pending = node
            .create_artifact(
                Some("orders".to_string()),
                ArtifactType::Json,
                Bytes::from_static(b"{\"name\":\"redhat\"}"),
            )
            .await
            .unwrap();
        assert_eq!(pending.artifact_id(), Some("orders"));

        let meta = pending.wait_metadata(WAIT).await.unwrap();
        assert_eq!(meta.version, 1);
        assert_eq!(meta.global_id.as_u64(), 1);

        assert_eq!(
            node.get_artifact("orders").unwrap(),
            Bytes::from_static(b"{\"name\":\"redhat\"}")
        );
        assert_eq!(node.list_versions("orders").unwrap(), vec![1]);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_generated_artifact_id() {
        let log = Arc::new(MemLog::new());
        let node = test_node(&log, 1);
        node.wait_ready().await.unwrap();

        let pending = node
            .create_artifact(None, ArtifactType::Json, Bytes::from_static(b"{}"))
            .await
            .unwrap();
        let id = pending.artifact_id().unwrap().to_string();
        let meta = pending.wait_metadata(WAIT).await.unwrap();
        assert_eq!(meta.id, id);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let log = Arc::new(MemLog::new());
        let node = test_node(&log, 1);
        node.wait_ready().await.unwrap();

        node.create_artifact(
            Some("orders".to_string()),
            ArtifactType::Json,
            Bytes::from_static(b"{}"),
        )
        .await
        .unwrap()
        .wait_metadata(WAIT)
        .await
        .unwrap();

        let result = node
            .create_artifact(
                Some("orders".to_string()),
                ArtifactType::Json,
                Bytes::from_static(b"{}"),
            )
            .await
            .unwrap()
            .wait(WAIT)
            .await;
        assert!(matches!(
            result,
            Err(RegistryError::Store(crate::store::StoreError::ArtifactExists { .. }))
        ));

        // The conflicting entry is recorded but changed nothing
        assert_eq!(node.list_versions("orders").unwrap(), vec![1]);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_not_found_reads() {
        let log = Arc::new(MemLog::new());
        let node = test_node(&log, 1);
        node.wait_ready().await.unwrap();

        assert!(node.get_artifact("missing").is_err());
        assert!(node.get_metadata_by_global_id(99).is_err());
        assert!(node.list_versions("missing").is_err());
        node.shutdown().await;
    }
}
