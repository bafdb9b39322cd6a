//! The gossip transport seam.
//!
//! The failure detector itself is an external library concern; the
//! cluster only needs three things from it: join a set of seeds,
//! broadcast a payload to every peer, and receive peer payloads. The
//! [`InProcessHub`] implementation wires transports together in one
//! process; it backs the tests and a single-node deployment, and a
//! memberlist-style library slots in behind the same trait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{ClusterError, Result};

/// Capacity of the incoming-payload channel per transport.
const INCOMING_BUFFER: usize = 256;

#[async_trait]
pub trait GossipTransport: Send + Sync {
    /// Contact seed addresses to bootstrap. Succeeds if any seed
    /// responds.
    async fn join(&self, seeds: &[String]) -> Result<()>;

    /// Reliably broadcast `payload` to every known peer.
    async fn broadcast(&self, payload: Vec<u8>) -> Result<()>;

    /// Leave the mesh, best-effort.
    async fn leave(&self) -> Result<()>;

    /// Subscribe to payloads broadcast by peers. Payloads arrive in
    /// causal order per subscriber.
    fn incoming(&self) -> broadcast::Receiver<Vec<u8>>;
}

/// Connects [`InProcessTransport`]s in one process.
pub struct InProcessHub {
    bus: broadcast::Sender<(usize, Vec<u8>)>,
    next_id: std::sync::atomic::AtomicUsize,
}

impl InProcessHub {
    pub fn new() -> Arc<Self> {
        let (bus, _) = broadcast::channel(INCOMING_BUFFER);
        Arc::new(Self {
            bus,
            next_id: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    /// Register a new transport endpoint on this hub.
    pub fn transport(self: &Arc<Self>) -> Arc<InProcessTransport> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (incoming, _) = broadcast::channel(INCOMING_BUFFER);
        let transport = Arc::new(InProcessTransport {
            id,
            hub: Arc::clone(self),
            incoming,
        });

        // Forward hub traffic from other endpoints into this transport.
        let mut bus_rx = self.bus.subscribe();
        let forward = Arc::clone(&transport);
        tokio::spawn(async move {
            while let Ok((sender, payload)) = bus_rx.recv().await {
                if sender != forward.id {
                    let _ = forward.incoming.send(payload);
                }
            }
        });

        transport
    }
}

/// One endpoint on an [`InProcessHub`].
pub struct InProcessTransport {
    id: usize,
    hub: Arc<InProcessHub>,
    incoming: broadcast::Sender<Vec<u8>>,
}

#[async_trait]
impl GossipTransport for InProcessTransport {
    async fn join(&self, seeds: &[String]) -> Result<()> {
        // Every endpoint on the hub is already connected; an empty seed
        // list bootstraps a brand-new cluster, which is fine too.
        let _ = seeds;
        Ok(())
    }

    async fn broadcast(&self, payload: Vec<u8>) -> Result<()> {
        self.hub
            .bus
            .send((self.id, payload))
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        Ok(())
    }

    fn incoming(&self) -> broadcast::Receiver<Vec<u8>> {
        self.incoming.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_other_endpoints() {
        let hub = InProcessHub::new();
        let a = hub.transport();
        let b = hub.transport();

        let mut b_rx = b.incoming();
        // Give the forwarder task a chance to subscribe.
        tokio::task::yield_now().await;

        a.broadcast(b"hello".to_vec()).await.unwrap();
        let got = tokio::time::timeout(std::time::Duration::from_secs(1), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn test_broadcast_does_not_echo_to_sender() {
        let hub = InProcessHub::new();
        let a = hub.transport();
        let _b = hub.transport();

        let mut a_rx = a.incoming();
        tokio::task::yield_now().await;

        a.broadcast(b"ping".to_vec()).await.unwrap();
        let echo =
            tokio::time::timeout(std::time::Duration::from_millis(100), a_rx.recv()).await;
        assert!(echo.is_err(), "sender must not receive its own broadcast");
    }
}
