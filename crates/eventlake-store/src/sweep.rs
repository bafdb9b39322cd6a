//! TTL sweep.
//!
//! A single background task walks the keyspace every
//! [`SWEEP_INTERVAL`] and removes blocks whose max event time (read
//! straight from the key, no payload decode) is older than `now - ttl`.
//! Passes are idempotent and safe to re-run; a crashed pass just leaves
//! work for the next one.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use eventlake_core::key::BlockKey;

use crate::error::Result;
use crate::kv::{Scan, Store};

/// Default cadence of sweep passes.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct Sweeper {
    store: Arc<dyn Store>,
    ttl: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            interval: SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run sweep passes until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.interval);
        // The immediate first tick would sweep at startup; skip it.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    match self.sweep_once(now_ns()) {
                        Ok(0) => debug!("sweep pass found nothing to expire"),
                        Ok(removed) => info!(removed, "sweep removed expired blocks"),
                        Err(e) => warn!(error = %e, "sweep pass failed"),
                    }
                }
            }
        }
        debug!("sweeper stopped");
    }

    /// One pass: delete every entry whose key time is older than
    /// `now - ttl`. Returns the number of entries removed.
    pub fn sweep_once(&self, now_ns: i64) -> Result<usize> {
        let cutoff = now_ns.saturating_sub(self.ttl.as_nanos() as i64);

        let mut expired: Vec<Vec<u8>> = Vec::new();
        self.store
            .range(&[0u8; 24], &[0xFFu8; 25], &mut |key, _| {
                if matches!(BlockKey::time_of(key), Ok(t) if t < cutoff) {
                    expired.push(key.to_vec());
                }
                Scan::Continue
            })?;

        for key in &expired {
            // A full key is its own prefix; this removes exactly one
            // entry per expired block.
            self.store.delete_prefix(key)?;
        }
        Ok(expired.len())
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
