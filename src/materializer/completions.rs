//! Write completions
//!
//! A writer that appends to the log gets back a position immediately, but
//! the outcome of the write (assigned metadata, or a rejection) only exists
//! once the local materializer applies that position. The hub connects the
//! two: writers register a waiter for a position, the materializer delivers
//! the outcome.
//!
//! Delivery races registration (the materializer may apply an entry before
//! the writer has registered), so undelivered outcomes are parked in a
//! bounded buffer and handed out on registration. A writer that gives up
//! (timeout) just drops its receiver; the log entry stays durable either
//! way.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::rules::RuleViolation;
use crate::store::types::ArtifactMetadata;
use crate::store::StoreError;

/// Default number of unclaimed outcomes kept for late registrants
pub const DEFAULT_PARKED_CAPACITY: usize = 1024;

/// What applying a mutation produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A version was created; its metadata, including the global id
    Version(ArtifactMetadata),
    /// The mutation applied without producing a version
    None,
}

/// Why a mutation did not apply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Store-level conflict or missing target
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Rejected by a configured rule
    #[error(transparent)]
    Rule(#[from] RuleViolation),
}

/// Outcome of materializing one log entry
pub type ApplyOutcome = Result<Applied, WriteError>;

#[derive(Default)]
struct HubInner {
    /// Registered waiters by position
    waiters: HashMap<u64, oneshot::Sender<ApplyOutcome>>,
    /// Outcomes applied before anyone registered
    parked: BTreeMap<u64, ApplyOutcome>,
}

/// Connects writers awaiting an outcome with the materializer producing it
pub struct CompletionHub {
    inner: Mutex<HubInner>,
    parked_capacity: usize,
}

impl CompletionHub {
    /// Hub with the default parked-outcome capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PARKED_CAPACITY)
    }

    /// Hub keeping at most `parked_capacity` unclaimed outcomes
    pub fn with_capacity(parked_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HubInner::default()),
            parked_capacity,
        }
    }

    /// Register interest in the outcome of `position`
    ///
    /// Resolves immediately if the outcome is already parked.
    pub fn register(&self, position: u64) -> oneshot::Receiver<ApplyOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if let Some(outcome) = inner.parked.remove(&position) {
            // Receiver is in hand, the send cannot fail
            let _ = tx.send(outcome);
        } else {
            inner.waiters.insert(position, tx);
        }
        rx
    }

    /// Deliver the outcome of `position`
    pub fn complete(&self, position: u64, outcome: ApplyOutcome) {
        let mut inner = self.inner.lock();
        if let Some(tx) = inner.waiters.remove(&position) {
            // A dropped receiver means the writer stopped waiting
            let _ = tx.send(outcome);
            return;
        }

        inner.parked.insert(position, outcome);
        while inner.parked.len() > self.parked_capacity {
            inner.parked.pop_first();
        }
    }
}

impl Default for CompletionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_then_complete() {
        let hub = CompletionHub::new();
        let rx = hub.register(3);
        hub.complete(3, Ok(Applied::None));
        assert_eq!(rx.await.unwrap(), Ok(Applied::None));
    }

    #[tokio::test]
    async fn test_complete_before_register_parks() {
        let hub = CompletionHub::new();
        hub.complete(7, Ok(Applied::None));
        let rx = hub.register(7);
        assert_eq!(rx.await.unwrap(), Ok(Applied::None));
    }

    #[tokio::test]
    async fn test_parked_capacity_evicts_oldest() {
        let hub = CompletionHub::with_capacity(2);
        hub.complete(1, Ok(Applied::None));
        hub.complete(2, Ok(Applied::None));
        hub.complete(3, Ok(Applied::None));

        // Position 1 was evicted; its waiter hangs until dropped
        let mut rx = hub.register(1);
        assert!(rx.try_recv().is_err());

        assert_eq!(hub.register(3).await.unwrap(), Ok(Applied::None));
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_harmless() {
        let hub = CompletionHub::new();
        let rx = hub.register(5);
        drop(rx);
        hub.complete(5, Ok(Applied::None));
    }
}
