//! Composite block keys.
//!
//! Blocks are stored under a 24-byte binary key:
//!
//! ```text
//! partition hash (8) | event time, big-endian ns (8) | sequence (8)
//! ```
//!
//! The hash is the first 8 bytes of SHA-256 over the partition string,
//! wide enough that collisions within a TTL window are vanishingly rare.
//! The time component is the block's max event time, big-endian so
//! lexicographic order equals chronological order. The sequence is a
//! process-local monotonic counter that disambiguates concurrent appends:
//! appends never overwrite.

use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Encoded key width in bytes.
pub const KEY_LEN: usize = 24;
/// Width of the partition-hash prefix.
pub const HASH_LEN: usize = 8;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A decoded `(partition hash, event time, sequence)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockKey {
    pub hash: [u8; HASH_LEN],
    pub time: i64,
    pub seq: u64,
}

impl BlockKey {
    /// Next key for a block of `partition` whose max event time is
    /// `max_time` nanoseconds.
    pub fn next(partition: &str, max_time: i64) -> Self {
        Self {
            hash: partition_hash(partition),
            time: max_time,
            seq: SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn encode(&self) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        key[..8].copy_from_slice(&self.hash);
        key[8..16].copy_from_slice(&(self.time as u64).to_be_bytes());
        key[16..].copy_from_slice(&self.seq.to_be_bytes());
        key
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != KEY_LEN {
            return Err(Error::InvalidKey {
                expected: KEY_LEN,
                got: raw.len(),
            });
        }
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(&raw[..8]);
        let time = u64::from_be_bytes(raw[8..16].try_into().unwrap()) as i64;
        let seq = u64::from_be_bytes(raw[16..].try_into().unwrap());
        Ok(Self { hash, time, seq })
    }

    /// Event time encoded in a raw key, without a full decode.
    pub fn time_of(raw: &[u8]) -> Result<i64> {
        if raw.len() != KEY_LEN {
            return Err(Error::InvalidKey {
                expected: KEY_LEN,
                got: raw.len(),
            });
        }
        Ok(u64::from_be_bytes(raw[8..16].try_into().unwrap()) as i64)
    }
}

/// Fixed-width hash prefix for a partition string.
pub fn partition_hash(partition: &str) -> [u8; HASH_LEN] {
    let digest = Sha256::digest(partition.as_bytes());
    let mut hash = [0u8; HASH_LEN];
    hash.copy_from_slice(&digest[..HASH_LEN]);
    hash
}

/// `[low, high)` scan bounds for a time range, optionally confined to a
/// single partition prefix.
///
/// With a prefix the time component is bounded inside it; without one
/// the bounds cover the whole keyspace and callers filter per key on the
/// time component.
pub fn scan_bounds(prefix: Option<[u8; HASH_LEN]>, t0: i64, t1: i64) -> (Vec<u8>, Vec<u8>) {
    match prefix {
        Some(hash) => {
            let mut low = Vec::with_capacity(KEY_LEN);
            low.extend_from_slice(&hash);
            low.extend_from_slice(&(t0 as u64).to_be_bytes());
            low.extend_from_slice(&[0u8; 8]);

            let mut high = Vec::with_capacity(KEY_LEN);
            high.extend_from_slice(&hash);
            high.extend_from_slice(&(t1 as u64).to_be_bytes());
            high.extend_from_slice(&[0u8; 8]);
            (low, high)
        }
        None => (vec![0u8; KEY_LEN], vec![0xFFu8; KEY_LEN + 1]),
    }
}
