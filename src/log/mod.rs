//! Ordered entry log abstraction
//!
//! The log is the single shared mutable resource in the system: an ordered,
//! durable sequence of opaque entries. Appends return a strictly increasing
//! position; subscribers tail from any recorded position. The registry core
//! only consumes this interface; the real transport (and its durability)
//! lives outside the crate. `MemLog` is the in-process implementation used
//! by tests and the demo cluster.
//!
//! Positions are 1-based; position 0 means "nothing consumed yet".

pub mod error;
pub mod mem;

use async_trait::async_trait;
use bytes::Bytes;

pub use error::{LogError, LogResult};
pub use mem::MemLog;

/// One entry as delivered to a subscriber
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Position assigned at append time
    pub position: u64,
    /// Entry payload
    pub payload: Bytes,
}

/// Ordered append-only entry log
///
/// The partition key keeps entries for the same artifact ordered relative to
/// each other if the underlying log is partitioned. The deployments this
/// crate targets run a single sequence, in which case the key is advisory.
#[async_trait]
pub trait EntryLog: Send + Sync + 'static {
    /// Append an entry, returning its position
    async fn append(&self, partition_key: &str, payload: Bytes) -> LogResult<u64>;

    /// Subscribe from `from` (inclusive); tails live once caught up
    async fn subscribe(&self, from: u64) -> LogResult<Box<dyn LogStream>>;

    /// Position of the last appended entry (0 when empty)
    async fn head(&self) -> LogResult<u64>;
}

/// Lazy, restartable, ordered sequence of log entries
#[async_trait]
pub trait LogStream: Send {
    /// Next entry in position order; waits at the head for new appends
    async fn next(&mut self) -> LogResult<LogEntry>;
}
