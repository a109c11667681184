//! Materializer - applies the log to local state
//!
//! One materializer task per node owns all mutation of that node's store and
//! search index. It tails the shared log, decodes each entry, applies it
//! exactly once (re-delivered entries are skipped via the store's applied
//! position), consults the rule engine for version-creating entries, and
//! periodically persists a checkpoint so restarts resume instead of
//! replaying the whole log.
//!
//! Apply order is strictly sequential: no two entries are ever applied out
//! of order or concurrently, which is what gives every node the same linear
//! history.

pub mod checkpoint;
pub mod completions;

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{self, DecodeError, Mutation};
use crate::identity::{IdentityAssigner, IdentityError};
use crate::log::{EntryLog, LogEntry, LogError};
use crate::rules::{ProposedVersion, RuleEngine, RuleViolation};
use crate::search::SearchIndex;
use crate::store::types::{ArtifactMetadata, VersionRecord};
use crate::store::{RegistryStore, StoreError};

pub use checkpoint::{
    CheckpointError, CheckpointResult, CheckpointStore, FileCheckpoint, MemCheckpoint,
};
pub use completions::{Applied, ApplyOutcome, CompletionHub, WriteError};

/// Lifecycle of a node's materialization
///
/// `Bootstrapping` until the replay reaches the log head observed at
/// startup; from then on `CaughtUp` or `Lagging` depending on distance to
/// the live head. `Failed` is terminal and means local state stopped
/// advancing at the given position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Replaying towards the startup head; reads are not ready
    Bootstrapping,
    /// Within the lag threshold of the live head
    CaughtUp,
    /// Ready but behind the live head by more than the threshold
    Lagging,
    /// Materialization halted at `position`
    Failed { position: u64 },
}

impl NodeStatus {
    /// Whether the node serves reads (bootstrap replay completed)
    pub fn is_ready(&self) -> bool {
        matches!(self, NodeStatus::CaughtUp | NodeStatus::Lagging)
    }
}

/// Errors that halt materialization
///
/// Any of these stops the apply loop: continuing past a corrupt or
/// out-of-order entry would silently diverge this node from the rest of the
/// cluster.
#[derive(Error, Debug)]
pub enum MaterializeError {
    /// Corrupt log entry
    #[error("corrupt log entry at position {position}: {source}")]
    Decode {
        position: u64,
        #[source]
        source: DecodeError,
    },

    /// Log subscription failure
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Checkpoint persistence failure
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Global id assignment regressed
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

/// Materializer tuning
#[derive(Debug, Clone)]
pub struct MaterializerConfig {
    /// Persist a checkpoint every N applied entries
    pub checkpoint_every: u64,
    /// Entries behind the live head before reporting `Lagging`
    pub lag_threshold: u64,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: 32,
            lag_threshold: 64,
        }
    }
}

/// Per-node log consumer
pub struct Materializer {
    node_id: u64,
    log: Arc<dyn EntryLog>,
    store: Arc<RegistryStore>,
    index: Arc<RwLock<SearchIndex>>,
    engine: Arc<RuleEngine>,
    checkpoint: Box<dyn CheckpointStore>,
    hub: Arc<CompletionHub>,
    assigner: IdentityAssigner,
    config: MaterializerConfig,
    status_tx: watch::Sender<NodeStatus>,
}

/// Handle to a running materializer task
pub struct MaterializerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    status_rx: watch::Receiver<NodeStatus>,
}

impl MaterializerHandle {
    /// Watch the node status
    pub fn status(&self) -> watch::Receiver<NodeStatus> {
        self.status_rx.clone()
    }

    /// Stop the task and wait for it to persist its final checkpoint
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Materializer {
    /// Start the materializer task for one node
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        node_id: u64,
        log: Arc<dyn EntryLog>,
        store: Arc<RegistryStore>,
        index: Arc<RwLock<SearchIndex>>,
        engine: Arc<RuleEngine>,
        checkpoint: Box<dyn CheckpointStore>,
        hub: Arc<CompletionHub>,
        config: MaterializerConfig,
    ) -> MaterializerHandle {
        let (status_tx, status_rx) = watch::channel(NodeStatus::Bootstrapping);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let materializer = Materializer {
            node_id,
            log,
            store,
            index,
            engine,
            checkpoint,
            hub,
            assigner: IdentityAssigner::new(),
            config,
            status_tx,
        };
        let task = tokio::spawn(materializer.run(shutdown_rx));

        MaterializerHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            status_rx,
        }
    }

    async fn run(mut self, shutdown_rx: oneshot::Receiver<()>) {
        let mut current = 0u64;
        match self.consume(shutdown_rx, &mut current).await {
            Ok(()) => {
                if let Err(e) = self.save_checkpoint() {
                    tracing::warn!(
                        node_id = self.node_id,
                        error = %e,
                        "Final checkpoint save failed"
                    );
                }
                tracing::info!(node_id = self.node_id, "Materializer stopped");
            }
            Err(e) => {
                tracing::error!(
                    node_id = self.node_id,
                    position = current,
                    error = %e,
                    "Materialization halted"
                );
                let _ = self.status_tx.send(NodeStatus::Failed { position: current });
            }
        }
    }

    async fn consume(
        &mut self,
        mut shutdown_rx: oneshot::Receiver<()>,
        current: &mut u64,
    ) -> Result<(), MaterializeError> {
        if let Some(snapshot) = self.checkpoint.load()? {
            tracing::info!(
                node_id = self.node_id,
                position = snapshot.last_applied,
                "Restoring checkpoint"
            );
            self.assigner = IdentityAssigner::starting_after(snapshot.last_applied);
            self.store.restore(snapshot);
            self.index.write().rebuild(self.store.latest_versions());
        }

        let start_from = self.store.last_applied();
        let startup_head = self.log.head().await?;
        let checkpoint_every = self.config.checkpoint_every.max(1);
        let mut stream = self.log.subscribe(start_from + 1).await?;

        if start_from >= startup_head {
            self.update_status(start_from, startup_head, startup_head);
        } else {
            tracing::info!(
                node_id = self.node_id,
                from = start_from + 1,
                head = startup_head,
                "Bootstrap replay"
            );
        }

        loop {
            tokio::select! {
                entry = stream.next() => {
                    let entry = entry?;
                    *current = entry.position;
                    self.process(entry)?;

                    let head = self.log.head().await?;
                    self.update_status(*current, startup_head, head);

                    if *current % checkpoint_every == 0 {
                        self.save_checkpoint()?;
                    }
                }
                _ = &mut shutdown_rx => {
                    return Ok(());
                }
            }
        }
    }

    fn process(&self, entry: LogEntry) -> Result<(), MaterializeError> {
        let position = entry.position;
        if position <= self.store.last_applied() {
            tracing::debug!(node_id = self.node_id, position, "Entry already applied, skipping");
            return Ok(());
        }

        let mutation = codec::decode(&entry.payload)
            .map_err(|source| MaterializeError::Decode { position, source })?;

        let outcome = self.apply(position, &mutation)?;
        if let Err(rejection) = &outcome {
            tracing::debug!(
                node_id = self.node_id,
                position,
                reason = %rejection,
                "Mutation not applied"
            );
        }

        self.store.advance_applied(position);
        self.hub.complete(position, outcome);
        Ok(())
    }

    fn apply(&self, position: u64, mutation: &Mutation) -> Result<ApplyOutcome, MaterializeError> {
        match mutation {
            Mutation::CreateArtifact(m) => {
                if self.store.contains_artifact(&m.artifact_id) {
                    return Ok(Err(StoreError::ArtifactExists {
                        id: m.artifact_id.clone(),
                    }
                    .into()));
                }
                let proposed = ProposedVersion {
                    artifact_type: m.artifact_type,
                    content: &m.content,
                };
                if let Err(violation) = self.check_rules(&m.artifact_id, &proposed, &[]) {
                    return Ok(Err(violation.into()));
                }

                let global_id = self.assigner.assign(position)?;
                let record = match self.store.apply_create(
                    &m.artifact_id,
                    m.artifact_type,
                    m.content.clone(),
                    global_id,
                    m.created_on,
                ) {
                    Ok(record) => record,
                    Err(e) => return Ok(Err(e.into())),
                };

                self.index.write().index(&m.artifact_id, &record);
                tracing::info!(
                    node_id = self.node_id,
                    position,
                    artifact_id = %m.artifact_id,
                    global_id = %global_id,
                    "Artifact created"
                );
                Ok(Ok(Applied::Version(ArtifactMetadata::from_record(
                    &m.artifact_id,
                    &record,
                ))))
            }

            Mutation::AddVersion(m) => {
                let history = self.store.versions_of(&m.artifact_id);
                let artifact_type = match history.last() {
                    Some(latest) => latest.artifact_type,
                    None => {
                        return Ok(Err(StoreError::ArtifactNotFound {
                            id: m.artifact_id.clone(),
                        }
                        .into()))
                    }
                };
                let proposed = ProposedVersion {
                    artifact_type,
                    content: &m.content,
                };
                if let Err(violation) = self.check_rules(&m.artifact_id, &proposed, &history) {
                    return Ok(Err(violation.into()));
                }

                let global_id = self.assigner.assign(position)?;
                let record = match self.store.apply_add_version(
                    &m.artifact_id,
                    m.content.clone(),
                    global_id,
                    m.created_on,
                ) {
                    Ok(record) => record,
                    Err(e) => return Ok(Err(e.into())),
                };

                self.index.write().index(&m.artifact_id, &record);
                tracing::info!(
                    node_id = self.node_id,
                    position,
                    artifact_id = %m.artifact_id,
                    version = record.version,
                    global_id = %global_id,
                    "Version added"
                );
                Ok(Ok(Applied::Version(ArtifactMetadata::from_record(
                    &m.artifact_id,
                    &record,
                ))))
            }

            Mutation::UpdateMetadata(m) => {
                match self
                    .store
                    .apply_update_metadata(&m.artifact_id, m.selector, m.metadata.clone())
                {
                    Ok(_) => {
                        // The index reflects the latest version's metadata
                        if let Ok(latest) = self.store.latest_version(&m.artifact_id) {
                            self.index.write().index(&m.artifact_id, &latest);
                        }
                        Ok(Ok(Applied::None))
                    }
                    Err(e) => Ok(Err(e.into())),
                }
            }

            Mutation::SetRule(m) => {
                match self
                    .store
                    .apply_set_rule(&m.scope, m.rule_type, m.config.clone())
                {
                    Ok(()) => {
                        tracing::info!(
                            node_id = self.node_id,
                            position,
                            rule_type = %m.rule_type,
                            "Rule created"
                        );
                        Ok(Ok(Applied::None))
                    }
                    Err(e) => Ok(Err(e.into())),
                }
            }

            Mutation::DeleteRule(m) => match self.store.apply_delete_rule(&m.scope, m.rule_type) {
                Ok(()) => Ok(Ok(Applied::None)),
                Err(e) => Ok(Err(e.into())),
            },

            Mutation::DeleteArtifact(m) => match self.store.apply_delete_artifact(&m.artifact_id) {
                Ok(()) => {
                    self.index.write().remove(&m.artifact_id);
                    tracing::info!(
                        node_id = self.node_id,
                        position,
                        artifact_id = %m.artifact_id,
                        "Artifact deleted"
                    );
                    Ok(Ok(Applied::None))
                }
                Err(e) => Ok(Err(e.into())),
            },
        }
    }

    fn check_rules(
        &self,
        artifact_id: &str,
        proposed: &ProposedVersion<'_>,
        history: &[VersionRecord],
    ) -> Result<(), RuleViolation> {
        let artifact_rules = self.store.artifact_rules_map(artifact_id);
        let global_rules = self.store.global_rules_map();
        self.engine
            .evaluate(&artifact_rules, &global_rules, proposed, history)
    }

    fn update_status(&self, position: u64, startup_head: u64, head: u64) {
        if position < startup_head {
            return;
        }
        let lag = head.saturating_sub(position);
        let status = if lag > self.config.lag_threshold {
            NodeStatus::Lagging
        } else {
            NodeStatus::CaughtUp
        };
        self.status_tx.send_if_modified(|s| {
            if *s != status {
                *s = status;
                true
            } else {
                false
            }
        });
    }

    fn save_checkpoint(&self) -> CheckpointResult<()> {
        self.checkpoint.save(&self.store.snapshot())
    }
}
