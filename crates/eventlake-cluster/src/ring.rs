//! Consistent hashing for advisory split assignment.
//!
//! Node addresses and split keys hash onto a `[0, 2^64)` ring; a key is
//! assigned to the nearest node clockwise. When a node joins or leaves,
//! only the keys near its ring points move; the rest of the assignment
//! is stable.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Virtual points per node; more points smooth the distribution.
const VNODES: usize = 64;

pub struct HashRing {
    points: BTreeMap<u64, String>,
}

impl HashRing {
    pub fn new<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut points = BTreeMap::new();
        for node in nodes {
            for replica in 0..VNODES {
                points.insert(hash_of(&(&node, replica)), node.clone());
            }
        }
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Node owning `key`: the first ring point at or after the key's
    /// hash, wrapping around.
    pub fn assign(&self, key: &[u8]) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let h = hash_of(&key);
        self.points
            .range(h..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, node)| node.as_str())
    }
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
