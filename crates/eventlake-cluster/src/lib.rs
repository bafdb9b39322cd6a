//! Cluster membership and routing for eventlake.
//!
//! Nodes discover each other over a gossip transport and advertise their
//! serving address; the query engine discovers the fleet through DNS
//! records this crate keeps reconciled with the live member set.
//!
//! - [`membership::Cluster`]: live member set, join, heartbeat,
//!   dead-member pruning, Joined/Left event stream
//! - [`transport`]: the seam where a gossip library plugs in, plus an
//!   in-process hub used by tests and single-node deployments
//! - [`ring::HashRing`]: consistent hashing for advisory split
//!   assignment
//! - [`dns::DnsReconciler`]: debounced diff/apply against an external
//!   DNS provider

pub mod dns;
pub mod error;
pub mod membership;
pub mod ring;
pub mod transport;

pub use dns::{DnsProvider, DnsReconciler, DnsRecord, ZoneFileProvider};
pub use error::{ClusterError, Result};
pub use membership::{Cluster, Member, MembershipEvent};
pub use ring::HashRing;
pub use transport::{GossipTransport, InProcessHub};

/// Fixed gossip port (UDP and TCP).
pub const GOSSIP_PORT: u16 = 7946;
