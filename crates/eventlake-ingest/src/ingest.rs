//! The ingestion loop.
//!
//! One task owns the whole pipeline for a message: parse the
//! notification, fetch every referenced object, hand the bytes to the
//! [`Appender`], and ack only when everything appended. Failure
//! dispositions:
//!
//! - malformed notification or permanently unfetchable object → poison
//!   pill: acked so it never redelivers, and counted
//! - transient fetch failure or append failure → message left unacked;
//!   the queue redelivers after the visibility timeout
//!
//! On shutdown the loop finishes the message in flight, then exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{IngestError, Result};
use crate::fetch::Fetcher;
use crate::notification;
use crate::queue::{Message, QueueReader};

/// The narrow capability ingestion needs from the serving side: decode
/// a payload and append its blocks. The query server implements this.
#[async_trait]
pub trait Appender: Send + Sync {
    async fn append(&self, payload: Bytes) -> Result<()>;
}

/// Counters the monitor scrapes.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub messages_acked: AtomicU64,
    pub poison_pills: AtomicU64,
    pub retried_messages: AtomicU64,
}

pub struct Ingestor {
    reader: QueueReader,
    fetcher: Fetcher,
    appender: Arc<dyn Appender>,
    stats: IngestStats,
}

impl Ingestor {
    pub fn new(reader: QueueReader, fetcher: Fetcher, appender: Arc<dyn Appender>) -> Self {
        Self {
            reader,
            fetcher,
            appender,
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Poll → fetch → append until shutdown. The in-flight message is
    /// always finished before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("ingestion started");
        while let Some(message) = self.reader.next(&mut shutdown).await {
            self.process(&message).await;
        }
        info!("ingestion stopped");
    }

    async fn process(&self, message: &Message) {
        let refs = match notification::parse(&message.body) {
            Ok(refs) => refs,
            Err(e) => {
                warn!(receipt = %message.receipt, error = %e, "poison pill: bad notification");
                self.poison(message).await;
                return;
            }
        };

        // The fetcher's semaphore bounds actual parallelism.
        let fetches = refs
            .iter()
            .map(|r| self.fetcher.fetch(&r.bucket, &r.key));
        let results = futures::future::join_all(fetches).await;

        let mut payloads = Vec::with_capacity(refs.len());
        for (object, result) in refs.iter().zip(results) {
            match result {
                Ok(bytes) => payloads.push(bytes),
                Err(IngestError::PermanentFetch { location, reason }) => {
                    warn!(%location, %reason, "poison pill: object unfetchable");
                    self.poison(message).await;
                    return;
                }
                Err(e) => {
                    warn!(
                        bucket = %object.bucket,
                        key = %object.key,
                        error = %e,
                        "fetch failed, leaving message for redelivery"
                    );
                    self.stats.retried_messages.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }

        for payload in payloads {
            if let Err(e) = self.appender.append(payload).await {
                warn!(
                    receipt = %message.receipt,
                    error = %e,
                    "append failed, leaving message for redelivery"
                );
                self.stats.retried_messages.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        match message.ack().await {
            Ok(()) => {
                self.stats.messages_acked.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(receipt = %message.receipt, error = %e, "ack failed"),
        }
    }

    async fn poison(&self, message: &Message) {
        self.stats.poison_pills.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = message.ack().await {
            warn!(receipt = %message.receipt, error = %e, "failed to ack poison pill");
        }
    }
}
