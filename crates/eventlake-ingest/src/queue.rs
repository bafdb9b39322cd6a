//! Notification-queue reading.
//!
//! The queue client itself is an external concern behind
//! [`NotificationQueue`]: long-poll receive, ack, and visibility
//! extension. [`QueueReader`] turns it into a lazy, effectively
//! infinite sequence of [`Message`]s: empty polls and transient
//! receive errors never surface, and a message redelivers after its
//! visibility timeout unless acked.
//!
//! [`MemoryQueue`] is an in-process implementation with real visibility
//! semantics, used by tests and local development.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// Backoff after a failed receive before polling again.
const RECEIVE_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Queue endpoint configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub queue_url: String,
    pub region: String,
    /// Long-poll wait per receive call.
    pub wait_timeout: Duration,
    /// How long a received message stays invisible before redelivery.
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_url: String::new(),
            region: String::new(),
            wait_timeout: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

/// A received message before it is bound to its queue.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub receipt: String,
    pub body: Bytes,
}

/// The queue-client seam.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Long-poll for up to `wait`; an empty vec is a normal outcome.
    async fn receive(&self, wait: Duration) -> Result<Vec<RawMessage>>;

    /// Delete a message so it is never redelivered.
    async fn ack(&self, receipt: &str) -> Result<()>;

    /// Push the message's redelivery deadline out by `timeout`.
    async fn extend_visibility(&self, receipt: &str, timeout: Duration) -> Result<()>;
}

/// A message with its ack/extend callbacks bound.
pub struct Message {
    queue: Arc<dyn NotificationQueue>,
    visibility: Duration,
    pub receipt: String,
    pub body: Bytes,
}

impl Message {
    pub async fn ack(&self) -> Result<()> {
        self.queue.ack(&self.receipt).await
    }

    pub async fn extend_visibility(&self) -> Result<()> {
        self.queue
            .extend_visibility(&self.receipt, self.visibility)
            .await
    }
}

/// Long-polling reader that hides empty polls.
pub struct QueueReader {
    queue: Arc<dyn NotificationQueue>,
    config: QueueConfig,
    buffer: Mutex<VecDeque<RawMessage>>,
}

impl QueueReader {
    pub fn new(queue: Arc<dyn NotificationQueue>, config: QueueConfig) -> Self {
        Self {
            queue,
            config,
            buffer: Mutex::new(VecDeque::new()),
        }
    }

    /// Next message, or `None` once shutdown is signalled.
    ///
    /// Blocks across any number of empty polls; transient receive
    /// errors back off and retry without surfacing.
    pub async fn next(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Message> {
        loop {
            if *shutdown.borrow() {
                return None;
            }

            if let Some(raw) = self.buffer.lock().await.pop_front() {
                return Some(Message {
                    queue: Arc::clone(&self.queue),
                    visibility: self.config.visibility_timeout,
                    receipt: raw.receipt,
                    body: raw.body,
                });
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return None;
                    }
                }
                received = self.queue.receive(self.config.wait_timeout) => match received {
                    Ok(batch) => {
                        if !batch.is_empty() {
                            debug!(count = batch.len(), "received queue messages");
                            self.buffer.lock().await.extend(batch);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "queue receive failed, backing off");
                        tokio::select! {
                            _ = tokio::time::sleep(RECEIVE_RETRY_BACKOFF) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                },
            }
        }
    }
}

/// In-process queue with visibility-timeout redelivery.
pub struct MemoryQueue {
    entries: Mutex<Vec<MemoryEntry>>,
    visibility: Duration,
    next_receipt: AtomicU64,
}

struct MemoryEntry {
    receipt: String,
    body: Bytes,
    invisible_until: tokio::time::Instant,
}

impl MemoryQueue {
    pub fn new(visibility: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            visibility,
            next_receipt: AtomicU64::new(0),
        })
    }

    /// Publish a notification body.
    pub async fn push(&self, body: Bytes) {
        let receipt = format!("m-{}", self.next_receipt.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().await.push(MemoryEntry {
            receipt,
            body,
            invisible_until: tokio::time::Instant::now(),
        });
    }

    /// Messages still on the queue (visible or not).
    pub async fn outstanding(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl NotificationQueue for MemoryQueue {
    async fn receive(&self, wait: Duration) -> Result<Vec<RawMessage>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            {
                let now = tokio::time::Instant::now();
                let mut entries = self.entries.lock().await;
                let visible: Vec<RawMessage> = entries
                    .iter_mut()
                    .filter(|e| e.invisible_until <= now)
                    .map(|e| {
                        e.invisible_until = now + self.visibility;
                        RawMessage {
                            receipt: e.receipt.clone(),
                            body: e.body.clone(),
                        }
                    })
                    .collect();
                if !visible.is_empty() {
                    return Ok(visible);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn ack(&self, receipt: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.receipt != receipt);
        if entries.len() == before {
            return Err(IngestError::Queue(format!("unknown receipt {receipt}")));
        }
        Ok(())
    }

    async fn extend_visibility(&self, receipt: &str, timeout: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        match entries.iter_mut().find(|e| e.receipt == receipt) {
            Some(entry) => {
                entry.invisible_until = tokio::time::Instant::now() + timeout;
                Ok(())
            }
            None => Err(IngestError::Queue(format!("unknown receipt {receipt}"))),
        }
    }
}
