//! DNS reconciliation.
//!
//! The query engine discovers the fleet by resolving a well-known
//! domain. This module keeps that domain's A records equal to the live
//! member set: on every membership event (debounced within
//! [`RECONCILE_DEBOUNCE`]) it computes one A record per live member,
//! diffs against the provider's current record set, and applies a
//! batched upsert/delete. Failures are logged and retried on the next
//! event; DNS is eventually consistent with the cluster.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::{ClusterError, Result};
use crate::membership::Cluster;

/// Events within this window coalesce into one reconcile pass.
pub const RECONCILE_DEBOUNCE: Duration = Duration::from_secs(5);

const RECORD_TTL: u32 = 60;

/// One A record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsRecord {
    /// Record name, the serving domain.
    pub name: String,
    /// IPv4 address text.
    pub value: String,
    pub ttl: u32,
}

/// External authoritative DNS provider.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn list_records(&self, zone_id: &str, domain: &str) -> Result<Vec<DnsRecord>>;
    async fn upsert(&self, zone_id: &str, records: &[DnsRecord]) -> Result<()>;
    async fn delete(&self, zone_id: &str, records: &[DnsRecord]) -> Result<()>;
}

/// Keeps a DNS record set reconciled with the gossip member set.
pub struct DnsReconciler {
    cluster: Arc<Cluster>,
    provider: Arc<dyn DnsProvider>,
    domain: String,
    zone_id: String,
    debounce: Duration,
}

impl DnsReconciler {
    pub fn new(
        cluster: Arc<Cluster>,
        provider: Arc<dyn DnsProvider>,
        domain: impl Into<String>,
        zone_id: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            provider,
            domain: domain.into(),
            zone_id: zone_id.into(),
            debounce: RECONCILE_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Run until shutdown: an initial pass, then one debounced pass per
    /// burst of membership events.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.cluster.subscribe();

        if let Err(e) = self.reconcile().await {
            warn!(error = %e, domain = %self.domain, "initial DNS reconcile failed");
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(_) => {
                        self.debounce_window(&mut events, &mut shutdown).await;
                        if let Err(e) = self.reconcile().await {
                            warn!(error = %e, domain = %self.domain, "DNS reconcile failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "membership events lagged, reconciling anyway");
                        if let Err(e) = self.reconcile().await {
                            warn!(error = %e, domain = %self.domain, "DNS reconcile failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!(domain = %self.domain, "DNS reconciler stopped");
    }

    /// Swallow further events until the debounce window closes.
    async fn debounce_window(
        &self,
        events: &mut broadcast::Receiver<crate::membership::MembershipEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let deadline = tokio::time::sleep(self.debounce);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => {
                    if matches!(event, Err(broadcast::error::RecvError::Closed)) {
                        break;
                    }
                }
            }
        }
    }

    /// One diff-and-apply pass.
    pub async fn reconcile(&self) -> Result<()> {
        let target: HashSet<DnsRecord> = self
            .cluster
            .members()
            .iter()
            .map(|m| DnsRecord {
                name: self.domain.clone(),
                value: host_of(&m.address).to_string(),
                ttl: RECORD_TTL,
            })
            .collect();

        let current: HashSet<DnsRecord> = self
            .provider
            .list_records(&self.zone_id, &self.domain)
            .await?
            .into_iter()
            .collect();

        let to_add: Vec<DnsRecord> = target.difference(&current).cloned().collect();
        let to_remove: Vec<DnsRecord> = current.difference(&target).cloned().collect();

        if to_add.is_empty() && to_remove.is_empty() {
            return Ok(());
        }

        if !to_add.is_empty() {
            self.provider.upsert(&self.zone_id, &to_add).await?;
        }
        if !to_remove.is_empty() {
            self.provider.delete(&self.zone_id, &to_remove).await?;
        }

        info!(
            domain = %self.domain,
            added = to_add.len(),
            removed = to_remove.len(),
            "DNS records reconciled"
        );
        Ok(())
    }
}

fn host_of(address: &str) -> &str {
    address.split(':').next().unwrap_or(address)
}

/// [`DnsProvider`] over a hosts-format zone file (`address domain` per
/// line), the shape CoreDNS's `hosts` plugin and dnsmasq serve
/// directly. The reconciler's zone id names the file path. A cloud
/// provider client slots in behind the same trait.
pub struct ZoneFileProvider;

impl ZoneFileProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    fn read_lines(path: &str) -> Result<Vec<String>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ClusterError::DnsReconcileFailed(format!(
                "cannot read zone file {path}: {e}"
            ))),
        }
    }

    fn write_lines(path: &str, lines: &[String]) -> Result<()> {
        let tmp = format!("{path}.tmp");
        let body = if lines.is_empty() {
            String::new()
        } else {
            format!("{}\n", lines.join("\n"))
        };
        std::fs::write(&tmp, body)
            .and_then(|_| std::fs::rename(&tmp, path))
            .map_err(|e| {
                ClusterError::DnsReconcileFailed(format!("cannot write zone file {path}: {e}"))
            })
    }
}

#[async_trait]
impl DnsProvider for ZoneFileProvider {
    async fn list_records(&self, zone_id: &str, domain: &str) -> Result<Vec<DnsRecord>> {
        let mut records = Vec::new();
        for line in Self::read_lines(zone_id)? {
            let mut parts = line.split_whitespace();
            if let (Some(value), Some(name)) = (parts.next(), parts.next()) {
                if name == domain {
                    records.push(DnsRecord {
                        name: name.to_string(),
                        value: value.to_string(),
                        ttl: RECORD_TTL,
                    });
                }
            }
        }
        Ok(records)
    }

    async fn upsert(&self, zone_id: &str, records: &[DnsRecord]) -> Result<()> {
        let mut lines = Self::read_lines(zone_id)?;
        for record in records {
            let line = format!("{} {}", record.value, record.name);
            if !lines.contains(&line) {
                lines.push(line);
            }
        }
        Self::write_lines(zone_id, &lines)
    }

    async fn delete(&self, zone_id: &str, records: &[DnsRecord]) -> Result<()> {
        let mut lines = Self::read_lines(zone_id)?;
        for record in records {
            let line = format!("{} {}", record.value, record.name);
            lines.retain(|l| l != &line);
        }
        Self::write_lines(zone_id, &lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;
    use crate::membership::Cluster;
    use crate::transport::InProcessHub;
    use std::sync::Mutex;

    /// In-memory provider recording its record set and call counts.
    struct FakeProvider {
        records: Mutex<HashSet<DnsRecord>>,
        fail_next: Mutex<bool>,
        applies: Mutex<usize>,
    }

    impl FakeProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(HashSet::new()),
                fail_next: Mutex::new(false),
                applies: Mutex::new(0),
            })
        }

        fn values(&self) -> Vec<String> {
            let mut values: Vec<String> = self
                .records
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.value.clone())
                .collect();
            values.sort();
            values
        }
    }

    #[async_trait]
    impl DnsProvider for FakeProvider {
        async fn list_records(&self, _zone: &str, _domain: &str) -> Result<Vec<DnsRecord>> {
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(ClusterError::DnsReconcileFailed("provider down".into()));
            }
            Ok(self.records.lock().unwrap().iter().cloned().collect())
        }

        async fn upsert(&self, _zone: &str, records: &[DnsRecord]) -> Result<()> {
            *self.applies.lock().unwrap() += 1;
            let mut set = self.records.lock().unwrap();
            for r in records {
                set.insert(r.clone());
            }
            Ok(())
        }

        async fn delete(&self, _zone: &str, records: &[DnsRecord]) -> Result<()> {
            *self.applies.lock().unwrap() += 1;
            let mut set = self.records.lock().unwrap();
            for r in records {
                set.remove(r);
            }
            Ok(())
        }
    }

    fn single_node_cluster(addr: &str) -> Arc<Cluster> {
        let hub = InProcessHub::new();
        Cluster::new(hub.transport(), "n1", addr)
    }

    #[tokio::test]
    async fn test_reconcile_programs_one_record_per_member() {
        let cluster = single_node_cluster("10.1.2.3:8042");
        let provider = FakeProvider::new();
        let reconciler = DnsReconciler::new(
            cluster,
            Arc::clone(&provider) as Arc<dyn DnsProvider>,
            "events.example.com",
            "Z123",
        );

        reconciler.reconcile().await.unwrap();
        assert_eq!(provider.values(), vec!["10.1.2.3"]);
    }

    #[tokio::test]
    async fn test_reconcile_removes_stale_records() {
        let cluster = single_node_cluster("10.1.2.3:8042");
        let provider = FakeProvider::new();
        provider.records.lock().unwrap().insert(DnsRecord {
            name: "events.example.com".into(),
            value: "10.9.9.9".into(),
            ttl: RECORD_TTL,
        });

        let reconciler = DnsReconciler::new(
            cluster,
            Arc::clone(&provider) as Arc<dyn DnsProvider>,
            "events.example.com",
            "Z123",
        );
        reconciler.reconcile().await.unwrap();
        assert_eq!(provider.values(), vec!["10.1.2.3"]);
    }

    #[tokio::test]
    async fn test_reconcile_is_a_noop_when_converged() {
        let cluster = single_node_cluster("10.1.2.3:8042");
        let provider = FakeProvider::new();
        let reconciler = DnsReconciler::new(
            cluster,
            Arc::clone(&provider) as Arc<dyn DnsProvider>,
            "events.example.com",
            "Z123",
        );

        reconciler.reconcile().await.unwrap();
        let applies_after_first = *provider.applies.lock().unwrap();
        reconciler.reconcile().await.unwrap();
        assert_eq!(*provider.applies.lock().unwrap(), applies_after_first);
    }

    #[tokio::test]
    async fn test_failure_is_retried_on_next_pass() {
        let cluster = single_node_cluster("10.1.2.3:8042");
        let provider = FakeProvider::new();
        *provider.fail_next.lock().unwrap() = true;

        let reconciler = DnsReconciler::new(
            cluster,
            Arc::clone(&provider) as Arc<dyn DnsProvider>,
            "events.example.com",
            "Z123",
        );

        assert!(reconciler.reconcile().await.is_err());
        reconciler.reconcile().await.unwrap();
        assert_eq!(provider.values(), vec!["10.1.2.3"]);
    }

    #[tokio::test]
    async fn test_zone_file_provider_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let zone = dir.path().join("zone.hosts");
        let zone = zone.to_str().unwrap();
        let provider = ZoneFileProvider::new();

        let records = vec![
            DnsRecord {
                name: "events.example.com".into(),
                value: "10.0.0.1".into(),
                ttl: RECORD_TTL,
            },
            DnsRecord {
                name: "events.example.com".into(),
                value: "10.0.0.2".into(),
                ttl: RECORD_TTL,
            },
        ];
        provider.upsert(zone, &records).await.unwrap();

        let mut listed = provider
            .list_records(zone, "events.example.com")
            .await
            .unwrap();
        listed.sort_by(|a, b| a.value.cmp(&b.value));
        assert_eq!(listed, records);

        provider.delete(zone, &records[..1]).await.unwrap();
        let listed = provider
            .list_records(zone, "events.example.com")
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].value, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_zone_file_provider_missing_file_is_empty() {
        let provider = ZoneFileProvider::new();
        let listed = provider
            .list_records("/tmp/eventlake-no-such-zone.hosts", "d")
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_zone_file_provider_ignores_other_domains() {
        let dir = tempfile::tempdir().unwrap();
        let zone = dir.path().join("zone.hosts");
        std::fs::write(&zone, "10.0.0.9 other.example.com\n").unwrap();
        let provider = ZoneFileProvider::new();
        let listed = provider
            .list_records(zone.to_str().unwrap(), "events.example.com")
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_departed_member_leaves_dns_after_debounce() {
        use crate::membership::MembershipEvent;
        use std::time::Duration;

        let hub = InProcessHub::new();
        let a = Cluster::with_timeouts(
            hub.transport(),
            "a",
            "10.0.0.1:8042",
            Default::default(),
            Duration::from_millis(200),
            Duration::from_millis(25),
        );
        let b = Cluster::with_timeouts(
            hub.transport(),
            "b",
            "10.0.0.2:8042",
            Default::default(),
            Duration::from_millis(200),
            Duration::from_millis(25),
        );

        let provider = FakeProvider::new();
        let reconciler = DnsReconciler::new(
            Arc::clone(&a),
            Arc::clone(&provider) as Arc<dyn DnsProvider>,
            "events.example.com",
            "Z123",
        )
        .with_debounce(Duration::from_millis(50));

        let (tx, shutdown) = watch::channel(false);
        let ha = tokio::spawn(Arc::clone(&a).run(shutdown.clone()));
        let hb = tokio::spawn(Arc::clone(&b).run(shutdown.clone()));
        let hr = tokio::spawn(reconciler.run(shutdown.clone()));

        // Wait until both nodes are in DNS.
        let mut deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while provider.values().len() != 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(provider.values(), vec!["10.0.0.1", "10.0.0.2"]);

        // b departs; within debounce + dead timeout its record is gone.
        let mut events = a.subscribe();
        b.leave().await;
        let _ = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(MembershipEvent::Left(_)) = events.recv().await {
                    break;
                }
            }
        })
        .await;

        deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while provider.values().len() != 1 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(provider.values(), vec!["10.0.0.1"]);

        tx.send(true).unwrap();
        let _ = ha.await;
        let _ = hb.await;
        let _ = hr.await;
    }
}
