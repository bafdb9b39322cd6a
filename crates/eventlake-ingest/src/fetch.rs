//! Object fetching with bounded concurrency and retry.
//!
//! Notifications name `(bucket, key)` pairs, and object-store clients
//! are bucket-scoped, so the fetcher builds one client per bucket
//! through an injected factory and caches it. All fetches share one
//! semaphore so a burst of notifications never opens more than
//! `concurrency` connections.
//!
//! Transient failures retry with exponential backoff until the policy
//! is exhausted; a missing object (or a bucket the factory cannot
//! build a client for) is permanent and becomes a poison pill
//! upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use object_store::path::Path;
use object_store::ObjectStore;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// Builds a bucket-scoped object-store client.
pub type StoreFactory =
    dyn Fn(&str) -> object_store::Result<Arc<dyn ObjectStore>> + Send + Sync;

/// Exponential backoff schedule.
///
/// `backoff = min(initial * multiplier^attempt, max)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(exp as u64).min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Concurrent fetches across all callers.
    pub concurrency: usize,
    /// Hard timeout per attempt.
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            attempt_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Fetcher {
    factory: Arc<StoreFactory>,
    stores: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
    semaphore: Semaphore,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(factory: Arc<StoreFactory>, config: FetchConfig) -> Self {
        let semaphore = Semaphore::new(config.concurrency.max(1));
        Self {
            factory,
            stores: RwLock::new(HashMap::new()),
            semaphore,
            config,
        }
    }

    /// A fetcher where every bucket resolves to the same store. Used by
    /// tests and single-bucket local deployments.
    pub fn with_store(store: Arc<dyn ObjectStore>, config: FetchConfig) -> Self {
        Self::new(Arc::new(move |_| Ok(Arc::clone(&store))), config)
    }

    /// Fetch one object's bytes.
    pub async fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("fetch semaphore never closes");

        let store = self.store_for(bucket).await?;
        let location = Path::from(key);
        let mut attempt = 0u32;
        loop {
            match self.attempt(&store, bucket, &location).await {
                Ok(bytes) => {
                    debug!(bucket, key, bytes = bytes.len(), "object fetched");
                    return Ok(bytes);
                }
                Err(e @ IngestError::PermanentFetch { .. }) => return Err(e),
                Err(e) if attempt < self.config.retry.max_retries => {
                    let backoff = self.config.retry.backoff(attempt);
                    warn!(
                        bucket,
                        key,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "fetch attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        if let Some(store) = self.stores.read().await.get(bucket) {
            return Ok(Arc::clone(store));
        }

        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }
        // A bucket the factory rejects (bad name, no credentials) will
        // never succeed on redelivery.
        let store = (self.factory)(bucket).map_err(|e| IngestError::PermanentFetch {
            location: bucket.to_string(),
            reason: format!("cannot build client: {e}"),
        })?;
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }

    async fn attempt(
        &self,
        store: &Arc<dyn ObjectStore>,
        bucket: &str,
        location: &Path,
    ) -> Result<Bytes> {
        let result = tokio::time::timeout(self.config.attempt_timeout, store.get(location))
            .await
            .map_err(|_| IngestError::TransientFetch {
                location: format!("{bucket}/{location}"),
                reason: format!("attempt timed out after {:?}", self.config.attempt_timeout),
            })?;

        match result {
            Ok(response) => response
                .bytes()
                .await
                .map_err(|e| IngestError::TransientFetch {
                    location: format!("{bucket}/{location}"),
                    reason: e.to_string(),
                }),
            // A missing object will never appear on retry; the message
            // it came from is a poison pill.
            Err(object_store::Error::NotFound { .. }) => Err(IngestError::PermanentFetch {
                location: format!("{bucket}/{location}"),
                reason: "object not found".into(),
            }),
            Err(e) => Err(IngestError::TransientFetch {
                location: format!("{bucket}/{location}"),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::PutPayload;

    fn fast_config() -> FetchConfig {
        FetchConfig {
            concurrency: 2,
            attempt_timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
                multiplier: 2.0,
            },
        }
    }

    async fn store_with(key: &str, body: &[u8]) -> Arc<dyn ObjectStore> {
        let store = InMemory::new();
        store
            .put(&Path::from(key), PutPayload::from(body.to_vec()))
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_fetch_returns_bytes() {
        let store = store_with("batch.elcf", b"columns").await;
        let fetcher = Fetcher::with_store(store, fast_config());
        let bytes = fetcher.fetch("events", "batch.elcf").await.unwrap();
        assert_eq!(bytes, Bytes::from("columns"));
    }

    #[tokio::test]
    async fn test_missing_object_is_permanent() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let fetcher = Fetcher::with_store(store, fast_config());
        let err = fetcher.fetch("events", "nope.elcf").await.unwrap_err();
        assert!(matches!(err, IngestError::PermanentFetch { .. }));
    }

    #[tokio::test]
    async fn test_rejected_bucket_is_permanent() {
        let fetcher = Fetcher::new(
            Arc::new(|bucket: &str| {
                Err(object_store::Error::Generic {
                    store: "test",
                    source: format!("no credentials for {bucket}").into(),
                })
            }),
            fast_config(),
        );
        let err = fetcher.fetch("forbidden", "k").await.unwrap_err();
        assert!(matches!(err, IngestError::PermanentFetch { .. }));
    }

    #[tokio::test]
    async fn test_bucket_clients_are_cached() {
        let built = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let fetcher = Fetcher::new(
            Arc::new(move |_| {
                counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok(Arc::new(InMemory::new()) as Arc<dyn ObjectStore>)
            }),
            fast_config(),
        );

        // Both fetches fail (empty stores) but the client builds once.
        let _ = fetcher.fetch("b1", "k").await;
        let _ = fetcher.fetch("b1", "k2").await;
        assert_eq!(built.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let store = store_with("k", b"x").await;
        let fetcher = Arc::new(Fetcher::with_store(store, fast_config()));

        // With a bound of 2, ten parallel fetches still all succeed.
        let mut handles = Vec::new();
        for _ in 0..10 {
            let f = Arc::clone(&fetcher);
            handles.push(tokio::spawn(async move { f.fetch("b", "k").await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(fetcher.semaphore.available_permits(), 2);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(8), Duration::from_secs(1));
    }
}
