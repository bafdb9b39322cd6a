//! Thin adapter over the embedded sorted KV engine.
//!
//! The rest of the crate only needs four operations: a durable put, an
//! ascending ranged scan with early stop, a prefix delete, and a
//! best-effort size for telemetry. [`DiskStore`] provides them over
//! rocksdb; the [`Store`] trait is the seam tests and tables share.
//!
//! Reads and writes are safe across threads; rocksdb linearises writes
//! per key. The database closes when the store drops.

use std::path::Path;

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};

use crate::error::{Result, StoreError};

/// Whether a ranged scan continues past the current entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Continue,
    Stop,
}

pub trait Store: Send + Sync {
    /// Atomic single-key write, durable on return.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Visit keys in `[low, high)` in ascending order until exhausted
    /// or the callback returns [`Scan::Stop`].
    fn range(&self, low: &[u8], high: &[u8], f: &mut dyn FnMut(&[u8], &[u8]) -> Scan)
        -> Result<()>;

    /// Remove every key beginning with `prefix`. A full key is its own
    /// prefix, so this doubles as a single-key delete.
    fn delete_prefix(&self, prefix: &[u8]) -> Result<()>;

    /// Best-effort on-disk size in bytes.
    fn size(&self) -> u64;
}

/// rocksdb-backed [`Store`].
pub struct DiskStore {
    db: DB,
}

impl DiskStore {
    /// Open (or create) the database under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(256);
        let db = DB::open(&opts, dir.as_ref())
            .map_err(|e| StoreError::Unavailable(format!("cannot open store: {e}")))?;
        Ok(Self { db })
    }
}

impl Store for DiskStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put(key, value)?;
        Ok(())
    }

    fn range(
        &self,
        low: &[u8],
        high: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> Scan,
    ) -> Result<()> {
        let iter = self
            .db
            .iterator(IteratorMode::From(low, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if key.as_ref() >= high {
                break;
            }
            if f(&key, &value) == Scan::Stop {
                break;
            }
        }
        Ok(())
    }

    fn delete_prefix(&self, prefix: &[u8]) -> Result<()> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        let mut batch = WriteBatch::default();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            batch.delete(&key);
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn size(&self) -> u64 {
        let sst = self
            .db
            .property_int_value("rocksdb.live-sst-files-size")
            .ok()
            .flatten()
            .unwrap_or(0);
        let mem = self
            .db
            .property_int_value("rocksdb.cur-size-all-mem-tables")
            .ok()
            .flatten()
            .unwrap_or(0);
        sst + mem
    }
}
