//! Shared test utilities
//!
//! Note: clippy reports false-positive dead_code warnings because it can't
//! trace usage across test binaries. These utilities are used by multiple tests.

#![allow(dead_code)]

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use relica::log::{EntryLog, MemLog};
use relica::node::{NodeConfig, RegistryNode};

/// Generous wait for local materialization
pub const WAIT: Duration = Duration::from_secs(5);

/// Start `count` ready nodes over one shared in-memory log
pub async fn start_cluster(count: u64) -> (Arc<MemLog>, Vec<RegistryNode>) {
    let log = Arc::new(MemLog::new());
    let mut nodes = Vec::new();
    for node_id in 1..=count {
        let dyn_log: Arc<dyn EntryLog> = log.clone();
        let node = RegistryNode::start(
            NodeConfig {
                node_id,
                ..Default::default()
            },
            dyn_log,
        )
        .unwrap();
        node.wait_ready().await.unwrap();
        nodes.push(node);
    }
    (log, nodes)
}

/// Retry `check` with backoff until it passes
///
/// This is the caller-side convergence pattern: a write through one node
/// becomes visible on another only after that node materializes the entry,
/// so assertions against a lagging node retry instead of failing once.
pub async fn retry<T, E: Debug>(mut check: impl FnMut() -> Result<T, E>) -> T {
    let mut delay = Duration::from_millis(10);
    let mut last_err = None;
    for _ in 0..40 {
        match check() {
            Ok(value) => return value,
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_millis(200));
    }
    panic!("condition not met after retries: {:?}", last_err);
}
