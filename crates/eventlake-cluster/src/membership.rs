//! Live member set over a gossip transport.
//!
//! Every node periodically broadcasts an announcement carrying its
//! `(node_id, serving_address)` and attributes. Peers upsert the sender
//! into their member map on every sighting and prune members that stay
//! silent past [`DEAD_TIMEOUT`]. Member snapshots are copy-on-write:
//! readers clone an `Arc`, writers swap in a new map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::{ClusterError, Result};
use crate::transport::GossipTransport;

/// A member is removed after this long without a heartbeat.
pub const DEAD_TIMEOUT: Duration = Duration::from_secs(30);
/// How often the local node re-advertises itself.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Capacity of the membership-event channel per subscriber.
const EVENT_BUFFER: usize = 64;

/// One node of the serving fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub node_id: String,
    /// Serving address, `host:port`.
    pub address: String,
    pub attributes: HashMap<String, String>,
    /// Milliseconds since epoch of the last heartbeat.
    pub last_seen: i64,
}

/// Membership change, delivered in causal order per subscriber.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    Joined(Member),
    Left(Member),
}

/// Gossip announcement payload.
#[derive(Debug, Serialize, Deserialize)]
struct Announcement {
    node_id: String,
    address: String,
    attributes: HashMap<String, String>,
    #[serde(default)]
    leaving: bool,
}

/// The cluster view from one node.
pub struct Cluster {
    node_id: String,
    address: String,
    attributes: HashMap<String, String>,
    transport: Arc<dyn GossipTransport>,
    members: RwLock<Arc<HashMap<String, Member>>>,
    events: broadcast::Sender<MembershipEvent>,
    dead_timeout: Duration,
    heartbeat_interval: Duration,
}

impl Cluster {
    pub fn new(
        transport: Arc<dyn GossipTransport>,
        node_id: impl Into<String>,
        address: impl Into<String>,
    ) -> Arc<Self> {
        Self::with_attributes(transport, node_id, address, HashMap::new())
    }

    /// Like [`Cluster::new`], advertising `attributes` to every peer.
    pub fn with_attributes(
        transport: Arc<dyn GossipTransport>,
        node_id: impl Into<String>,
        address: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> Arc<Self> {
        Self::with_timeouts(
            transport,
            node_id,
            address,
            attributes,
            DEAD_TIMEOUT,
            HEARTBEAT_INTERVAL,
        )
    }

    pub fn with_timeouts(
        transport: Arc<dyn GossipTransport>,
        node_id: impl Into<String>,
        address: impl Into<String>,
        attributes: HashMap<String, String>,
        dead_timeout: Duration,
        heartbeat_interval: Duration,
    ) -> Arc<Self> {
        let node_id = node_id.into();
        let address = address.into();
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let mut initial = HashMap::new();
        initial.insert(
            node_id.clone(),
            Member {
                node_id: node_id.clone(),
                address: address.clone(),
                attributes: attributes.clone(),
                last_seen: now_ms(),
            },
        );

        Arc::new(Self {
            node_id,
            address,
            attributes,
            transport,
            members: RwLock::new(Arc::new(initial)),
            events,
            dead_timeout,
            heartbeat_interval,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Bootstrap by contacting seed addresses.
    ///
    /// Fatal only when no seed responds; an empty seed list starts a
    /// fresh cluster.
    pub async fn join(&self, seeds: &[String]) -> Result<()> {
        self.transport
            .join(seeds)
            .await
            .map_err(|e| ClusterError::JoinFailed(e.to_string()))?;
        self.announce().await?;
        info!(node_id = %self.node_id, seeds = seeds.len(), "joined gossip cluster");
        Ok(())
    }

    /// Snapshot of the current live members, sorted by node id.
    pub fn members(&self) -> Vec<Member> {
        let snapshot = Arc::clone(&self.members.read().expect("members lock"));
        let mut members: Vec<Member> = snapshot.values().cloned().collect();
        members.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        members
    }

    /// Subscribe to Joined/Left events.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    /// Run the heartbeat, receive, and prune loops until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut incoming = self.transport.incoming();
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        let prune_every = self.dead_timeout.checked_div(4).unwrap_or(self.dead_timeout);
        let mut prune = tokio::time::interval(prune_every.max(Duration::from_millis(10)));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.announce().await {
                        warn!(error = %e, "gossip announce failed");
                    }
                }
                _ = prune.tick() => {
                    self.prune();
                }
                payload = incoming.recv() => match payload {
                    Ok(payload) => self.handle(&payload),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "gossip receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!(node_id = %self.node_id, "membership loop stopped");
    }

    /// Leave the cluster, best-effort: tell peers, then drop the
    /// transport session.
    pub async fn leave(&self) {
        let farewell = Announcement {
            node_id: self.node_id.clone(),
            address: self.address.clone(),
            attributes: self.attributes.clone(),
            leaving: true,
        };
        if let Ok(payload) = serde_json::to_vec(&farewell) {
            let _ = self.transport.broadcast(payload).await;
        }
        let _ = self.transport.leave().await;
    }

    async fn announce(&self) -> Result<()> {
        // Keep our own last_seen fresh so the prune loop never evicts us.
        self.touch_self();
        let announcement = Announcement {
            node_id: self.node_id.clone(),
            address: self.address.clone(),
            attributes: self.attributes.clone(),
            leaving: false,
        };
        let payload = serde_json::to_vec(&announcement)?;
        self.transport.broadcast(payload).await
    }

    fn handle(&self, payload: &[u8]) {
        let announcement: Announcement = match serde_json::from_slice(payload) {
            Ok(a) => a,
            Err(e) => {
                debug!(error = %e, "dropping undecodable gossip payload");
                return;
            }
        };
        if announcement.node_id == self.node_id {
            return;
        }
        if announcement.leaving {
            self.remove(&announcement.node_id);
            return;
        }
        self.observe(announcement);
    }

    fn observe(&self, announcement: Announcement) {
        let member = Member {
            node_id: announcement.node_id,
            address: announcement.address,
            attributes: announcement.attributes,
            last_seen: now_ms(),
        };

        let mut guard = self.members.write().expect("members lock");
        let mut next = (**guard).clone();
        let is_new = next.insert(member.node_id.clone(), member.clone()).is_none();
        *guard = Arc::new(next);
        drop(guard);

        if is_new {
            info!(node_id = %member.node_id, address = %member.address, "member joined");
            let _ = self.events.send(MembershipEvent::Joined(member));
        }
    }

    fn remove(&self, node_id: &str) {
        let mut guard = self.members.write().expect("members lock");
        let mut next = (**guard).clone();
        let removed = next.remove(node_id);
        *guard = Arc::new(next);
        drop(guard);

        if let Some(member) = removed {
            info!(node_id = %member.node_id, "member left");
            let _ = self.events.send(MembershipEvent::Left(member));
        }
    }

    fn prune(&self) {
        let cutoff = now_ms() - self.dead_timeout.as_millis() as i64;
        let stale: Vec<String> = {
            let snapshot = self.members.read().expect("members lock");
            snapshot
                .values()
                .filter(|m| m.node_id != self.node_id && m.last_seen < cutoff)
                .map(|m| m.node_id.clone())
                .collect()
        };
        for node_id in stale {
            warn!(node_id = %node_id, "pruning silent member");
            self.remove(&node_id);
        }
    }

    fn touch_self(&self) {
        let mut guard = self.members.write().expect("members lock");
        let mut next = (**guard).clone();
        next.insert(
            self.node_id.clone(),
            Member {
                node_id: self.node_id.clone(),
                address: self.address.clone(),
                attributes: self.attributes.clone(),
                last_seen: now_ms(),
            },
        );
        *guard = Arc::new(next);
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InProcessHub;

    fn fast_cluster(
        transport: Arc<dyn GossipTransport>,
        id: &str,
        addr: &str,
    ) -> Arc<Cluster> {
        Cluster::with_timeouts(
            transport,
            id,
            addr,
            HashMap::new(),
            Duration::from_millis(200),
            Duration::from_millis(25),
        )
    }

    #[tokio::test]
    async fn test_attributes_propagate_to_peers() {
        let hub = InProcessHub::new();
        let mut attrs = HashMap::new();
        attrs.insert("env".to_string(), "staging".to_string());
        let a = Cluster::with_timeouts(
            hub.transport(),
            "a",
            "10.0.0.1:8042",
            attrs,
            Duration::from_millis(200),
            Duration::from_millis(25),
        );
        let b = fast_cluster(hub.transport(), "b", "10.0.0.2:8042");

        let (_tx, shutdown) = watch::channel(false);
        let ha = tokio::spawn(Arc::clone(&a).run(shutdown.clone()));
        let hb = tokio::spawn(Arc::clone(&b).run(shutdown.clone()));

        settle().await;
        let members = b.members();
        let a_view = members.iter().find(|m| m.node_id == "a").unwrap();
        assert_eq!(a_view.attributes.get("env").map(String::as_str), Some("staging"));

        ha.abort();
        hb.abort();
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(120)).await;
    }

    #[tokio::test]
    async fn test_members_always_contains_self() {
        let hub = InProcessHub::new();
        let cluster = fast_cluster(hub.transport(), "n1", "10.0.0.1:8042");
        let members = cluster.members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].node_id, "n1");
    }

    #[tokio::test]
    async fn test_two_nodes_discover_each_other() {
        let hub = InProcessHub::new();
        let a = fast_cluster(hub.transport(), "a", "10.0.0.1:8042");
        let b = fast_cluster(hub.transport(), "b", "10.0.0.2:8042");

        let (_tx, shutdown) = watch::channel(false);
        let ha = tokio::spawn(Arc::clone(&a).run(shutdown.clone()));
        let hb = tokio::spawn(Arc::clone(&b).run(shutdown.clone()));

        settle().await;

        let a_view: Vec<String> = a.members().iter().map(|m| m.node_id.clone()).collect();
        let b_view: Vec<String> = b.members().iter().map(|m| m.node_id.clone()).collect();
        assert_eq!(a_view, vec!["a", "b"]);
        assert_eq!(b_view, vec!["a", "b"]);

        ha.abort();
        hb.abort();
    }

    #[tokio::test]
    async fn test_joined_event_emitted_once() {
        let hub = InProcessHub::new();
        let a = fast_cluster(hub.transport(), "a", "10.0.0.1:8042");
        let b = fast_cluster(hub.transport(), "b", "10.0.0.2:8042");

        let mut events = a.subscribe();
        let (_tx, shutdown) = watch::channel(false);
        let ha = tokio::spawn(Arc::clone(&a).run(shutdown.clone()));
        let hb = tokio::spawn(Arc::clone(&b).run(shutdown.clone()));

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            MembershipEvent::Joined(member) => assert_eq!(member.node_id, "b"),
            other => panic!("expected Joined, got {other:?}"),
        }

        // Subsequent heartbeats must not re-emit Joined.
        settle().await;
        let again = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(again.is_err());

        ha.abort();
        hb.abort();
    }

    #[tokio::test]
    async fn test_silent_member_is_pruned_and_left_emitted() {
        let hub = InProcessHub::new();
        let a = fast_cluster(hub.transport(), "a", "10.0.0.1:8042");
        let b = fast_cluster(hub.transport(), "b", "10.0.0.2:8042");

        let (_a_tx, a_shutdown) = watch::channel(false);
        let (b_tx, b_shutdown) = watch::channel(false);
        let ha = tokio::spawn(Arc::clone(&a).run(a_shutdown));
        let hb = tokio::spawn(Arc::clone(&b).run(b_shutdown));

        settle().await;
        assert_eq!(a.members().len(), 2);

        let mut events = a.subscribe();

        // Stop b's heartbeats without a farewell; a must prune it.
        b_tx.send(true).unwrap();
        let _ = hb.await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let event = tokio::time::timeout_at(deadline, events.recv())
                .await
                .expect("expected Left event before deadline")
                .unwrap();
            if let MembershipEvent::Left(member) = event {
                assert_eq!(member.node_id, "b");
                break;
            }
        }
        assert_eq!(a.members().len(), 1);

        ha.abort();
    }

    #[tokio::test]
    async fn test_leave_announcement_removes_member() {
        let hub = InProcessHub::new();
        let a = fast_cluster(hub.transport(), "a", "10.0.0.1:8042");
        let b = fast_cluster(hub.transport(), "b", "10.0.0.2:8042");

        let (_tx, shutdown) = watch::channel(false);
        let ha = tokio::spawn(Arc::clone(&a).run(shutdown.clone()));
        let hb = tokio::spawn(Arc::clone(&b).run(shutdown.clone()));

        settle().await;
        assert_eq!(a.members().len(), 2);

        b.leave().await;
        settle().await;
        let ids: Vec<String> = a.members().iter().map(|m| m.node_id.clone()).collect();
        assert_eq!(ids, vec!["a"]);

        ha.abort();
        hb.abort();
    }
}
