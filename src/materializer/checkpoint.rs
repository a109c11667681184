//! Materialization checkpoints
//!
//! A checkpoint is a store snapshot paired with the log position it
//! reflects. On startup the materializer restores the snapshot and resumes
//! consumption from the recorded position; with no checkpoint it replays
//! from the beginning. Replay is idempotent, so a stale checkpoint is safe:
//! it only costs re-application time.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::store::StoreSnapshot;

/// Checkpoint persistence errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Durable storage for materialization checkpoints
pub trait CheckpointStore: Send + Sync {
    /// Load the last saved checkpoint, if any
    fn load(&self) -> CheckpointResult<Option<StoreSnapshot>>;

    /// Replace the saved checkpoint
    fn save(&self, snapshot: &StoreSnapshot) -> CheckpointResult<()>;
}

/// File-backed checkpoint
///
/// Saves write a sibling temp file and rename it into place, so a crash
/// mid-save leaves the previous checkpoint intact.
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    /// Checkpoint stored at `path`; parent directories are created
    pub fn new(path: impl Into<PathBuf>) -> CheckpointResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Checkpoint file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpoint {
    fn load(&self) -> CheckpointResult<Option<StoreSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = bincode::deserialize(&bytes)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &StoreSnapshot) -> CheckpointResult<()> {
        let bytes = bincode::serialize(snapshot)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory checkpoint
///
/// Clones share the slot, which lets tests hand the "same disk" to a
/// restarted node.
#[derive(Clone, Default)]
pub struct MemCheckpoint {
    slot: Arc<Mutex<Option<StoreSnapshot>>>,
}

impl MemCheckpoint {
    /// Empty checkpoint slot
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemCheckpoint {
    fn load(&self) -> CheckpointResult<Option<StoreSnapshot>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, snapshot: &StoreSnapshot) -> CheckpointResult<()> {
        *self.slot.lock() = Some(snapshot.clone());
        Ok(())
    }
}
