//! In-memory entry log
//!
//! A single-sequence log shared by every node of an in-process cluster.
//! Subscribers read by index and park on a `Notify` at the head, so streams
//! are restartable from any recorded position and never miss an entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::log::error::{LogError, LogResult};
use crate::log::{EntryLog, LogEntry, LogStream};

#[derive(Default)]
struct MemLogInner {
    /// Entries in append order; position = index + 1
    entries: RwLock<Vec<Bytes>>,
    /// Wakes tailing subscribers on append and on close
    notify: Notify,
    /// Closed flag
    closed: AtomicBool,
}

/// Shared in-memory log
#[derive(Clone, Default)]
pub struct MemLog {
    inner: Arc<MemLogInner>,
}

impl MemLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the log
    ///
    /// Further appends fail and tailing streams return `Closed` once they
    /// have drained every recorded entry.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl EntryLog for MemLog {
    async fn append(&self, _partition_key: &str, payload: Bytes) -> LogResult<u64> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(LogError::Closed);
        }

        let position = {
            let mut entries = self.inner.entries.write();
            entries.push(payload);
            entries.len() as u64
        };
        self.inner.notify.notify_waiters();
        Ok(position)
    }

    async fn subscribe(&self, from: u64) -> LogResult<Box<dyn LogStream>> {
        let head = self.inner.entries.read().len() as u64;
        if from > head + 1 {
            return Err(LogError::OutOfRange { from, head });
        }
        Ok(Box::new(MemLogStream {
            inner: self.inner.clone(),
            next_position: from.max(1),
        }))
    }

    async fn head(&self) -> LogResult<u64> {
        Ok(self.inner.entries.read().len() as u64)
    }
}

struct MemLogStream {
    inner: Arc<MemLogInner>,
    next_position: u64,
}

#[async_trait]
impl LogStream for MemLogStream {
    async fn next(&mut self) -> LogResult<LogEntry> {
        loop {
            // Arm the notification before checking, so an append between the
            // check and the await still wakes us.
            let notified = self.inner.notify.notified();

            {
                let entries = self.inner.entries.read();
                let index = (self.next_position - 1) as usize;
                if index < entries.len() {
                    let entry = LogEntry {
                        position: self.next_position,
                        payload: entries[index].clone(),
                    };
                    self.next_position += 1;
                    return Ok(entry);
                }
            }

            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(LogError::Closed);
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_append_assigns_increasing_positions() {
        let log = MemLog::new();
        assert_eq!(log.append("a", Bytes::from_static(b"one")).await.unwrap(), 1);
        assert_eq!(log.append("a", Bytes::from_static(b"two")).await.unwrap(), 2);
        assert_eq!(log.append("b", Bytes::from_static(b"three")).await.unwrap(), 3);
        assert_eq!(log.head().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_subscribe_replays_then_tails() {
        let log = MemLog::new();
        log.append("a", Bytes::from_static(b"one")).await.unwrap();
        log.append("a", Bytes::from_static(b"two")).await.unwrap();

        let mut stream = log.subscribe(1).await.unwrap();
        assert_eq!(stream.next().await.unwrap().position, 1);
        assert_eq!(stream.next().await.unwrap().position, 2);

        // Tail: next() blocks until a new append lands
        let log2 = log.clone();
        let appender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            log2.append("a", Bytes::from_static(b"three")).await.unwrap();
        });

        let entry = stream.next().await.unwrap();
        assert_eq!(entry.position, 3);
        assert_eq!(entry.payload, Bytes::from_static(b"three"));
        appender.await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_restartable_mid_log() {
        let log = MemLog::new();
        for i in 0..5u8 {
            log.append("a", Bytes::copy_from_slice(&[i])).await.unwrap();
        }

        let mut stream = log.subscribe(4).await.unwrap();
        assert_eq!(stream.next().await.unwrap().position, 4);
        assert_eq!(stream.next().await.unwrap().position, 5);
    }

    #[tokio::test]
    async fn test_subscribe_out_of_range() {
        let log = MemLog::new();
        log.append("a", Bytes::from_static(b"one")).await.unwrap();

        let result = log.subscribe(5).await;
        assert!(matches!(
            result,
            Err(LogError::OutOfRange { from: 5, head: 1 })
        ));
    }

    #[tokio::test]
    async fn test_closed_log() {
        let log = MemLog::new();
        log.append("a", Bytes::from_static(b"one")).await.unwrap();
        log.close();

        assert!(matches!(
            log.append("a", Bytes::from_static(b"two")).await,
            Err(LogError::Closed)
        ));

        // Recorded entries still drain before Closed surfaces
        let mut stream = log.subscribe(1).await.unwrap();
        assert_eq!(stream.next().await.unwrap().position, 1);
        assert!(matches!(stream.next().await, Err(LogError::Closed)));
    }
}
