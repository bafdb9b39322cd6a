//! Filesystem spool queue.
//!
//! A [`NotificationQueue`] backed by a spool directory: every regular
//! file is one message, its contents the notification body. Sidecar
//! systems (or `aws s3 cp` hooks) drop files in; ack deletes the file.
//! Claims live in memory, so an unacked message redelivers after the
//! visibility timeout and a process restart redelivers everything,
//! at-least-once either way.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::queue::{NotificationQueue, RawMessage};

const POLL_STEP: Duration = Duration::from_millis(50);

pub struct SpoolQueue {
    dir: PathBuf,
    visibility: Duration,
    claims: Mutex<HashMap<String, tokio::time::Instant>>,
}

impl SpoolQueue {
    /// Open a spool directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>, visibility: Duration) -> Result<Arc<Self>> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| IngestError::Queue(format!("cannot open spool {}: {e}", dir.display())))?;
        Ok(Arc::new(Self {
            dir,
            visibility,
            claims: Mutex::new(HashMap::new()),
        }))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| IngestError::Queue(format!("cannot read spool: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| IngestError::Queue(e.to_string()))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl NotificationQueue for SpoolQueue {
    async fn receive(&self, wait: Duration) -> Result<Vec<RawMessage>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let now = tokio::time::Instant::now();
            let mut batch = Vec::new();
            {
                let mut claims = self.claims.lock().await;
                claims.retain(|_, until| *until > now);
                for name in self.list_files()? {
                    if claims.contains_key(&name) {
                        continue;
                    }
                    let path = self.dir.join(&name);
                    match std::fs::read(&path) {
                        Ok(body) => {
                            claims.insert(name.clone(), now + self.visibility);
                            batch.push(RawMessage {
                                receipt: name,
                                body: Bytes::from(body),
                            });
                        }
                        // Acked concurrently between listing and read.
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(IngestError::Queue(e.to_string())),
                    }
                }
            }
            if !batch.is_empty() {
                debug!(count = batch.len(), "spool delivered messages");
                return Ok(batch);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(POLL_STEP).await;
        }
    }

    async fn ack(&self, receipt: &str) -> Result<()> {
        let path = self.dir.join(receipt);
        std::fs::remove_file(&path)
            .map_err(|e| IngestError::Queue(format!("ack {receipt}: {e}")))?;
        self.claims.lock().await.remove(receipt);
        Ok(())
    }

    async fn extend_visibility(&self, receipt: &str, timeout: Duration) -> Result<()> {
        let mut claims = self.claims.lock().await;
        match claims.get_mut(receipt) {
            Some(until) => {
                *until = tokio::time::Instant::now() + timeout;
                Ok(())
            }
            None => Err(IngestError::Queue(format!("unknown receipt {receipt}"))),
        }
    }
}
