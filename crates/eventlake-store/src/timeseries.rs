//! The time-series event-log table.
//!
//! Blocks append under `(partition hash, max event time, sequence)`
//! keys, so a ranged KV scan enumerates one partition chronologically.
//! Scans map onto the query engine's split model: consecutive keys group
//! into splits of roughly [`SPLIT_TARGET_BYTES`] value bytes (a block is
//! never split), each advisory-assigned to a live node by consistent
//! hashing on the split's low key.
//!
//! The read path re-filters rows to the split's `[t0, t1)` window, so a
//! block keyed inside the window never leaks earlier rows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use eventlake_cluster::{Cluster, HashRing};
use eventlake_core::key::{partition_hash, scan_bounds, BlockKey};
use eventlake_core::{Block, Column, ColumnType, Value};

use crate::error::{Result, StoreError};
use crate::kv::{Scan, Store};
use crate::split::{Split, SPLIT_TARGET_BYTES};
use crate::table::{AssignedSplit, Page, SplitRequest, Table, TableMeta};

/// Static configuration of the event-log table.
#[derive(Debug, Clone)]
pub struct TimeSeriesConfig {
    /// Logical table name the query engine sees.
    pub name: String,
    /// Partition column; must hold strings or 64-bit integers.
    pub key_column: String,
    /// Event-time column; must hold timestamp nanoseconds.
    pub time_column: String,
    /// Retention past a block's max event time.
    pub ttl: Duration,
}

pub struct TimeSeries {
    config: TimeSeriesConfig,
    store: Arc<dyn Store>,
    cluster: Arc<Cluster>,
}

impl TimeSeries {
    pub fn new(config: TimeSeriesConfig, store: Arc<dyn Store>, cluster: Arc<Cluster>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            cluster,
        })
    }

    pub fn config(&self) -> &TimeSeriesConfig {
        &self.config
    }

    /// The key column must exist and hold partitionable values.
    fn verify_key_column(&self, block: &Block) -> Result<()> {
        let (column, _) = block.column(&self.config.key_column).ok_or_else(|| {
            eventlake_core::Error::SchemaMismatch(format!(
                "key column {} not found",
                self.config.key_column
            ))
        })?;
        match column.kind {
            ColumnType::String | ColumnType::Int64 => Ok(()),
            other => Err(eventlake_core::Error::SchemaMismatch(format!(
                "key column {} has type {other}, expected string",
                self.config.key_column
            ))
            .into()),
        }
    }

    /// Collect `(key, value)` pairs of a key range. Iterator failures
    /// surface as `StoreUnavailable`; a partial scan is never returned.
    fn scan_raw(&self, low: &[u8], high: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        self.store.range(low, high, &mut |k, v| {
            entries.push((k.to_vec(), v.to_vec()));
            Scan::Continue
        })?;
        Ok(entries)
    }
}

#[async_trait]
impl Table for TimeSeries {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn meta(&self) -> TableMeta {
        TableMeta {
            name: self.config.name.clone(),
            columns: vec![
                Column::new(self.config.key_column.clone(), ColumnType::String),
                Column::new(self.config.time_column.clone(), ColumnType::Timestamp),
            ],
        }
    }

    async fn append(&self, block: Block) -> Result<()> {
        self.verify_key_column(&block)?;
        let block = block.with_time_bounds(&self.config.time_column)?;

        let key = BlockKey::next(block.partition(), block.time_bounds().1);
        let payload = block.encode();
        self.store.put(&key.encode(), &payload)?;

        debug!(
            table = %self.config.name,
            partition = %block.partition(),
            rows = block.row_count(),
            bytes = payload.len(),
            "block appended"
        );
        Ok(())
    }

    async fn splits(&self, req: &SplitRequest) -> Result<Vec<AssignedSplit>> {
        let t0 = req.t0.unwrap_or(0);
        let t1 = req.t1.unwrap_or(i64::MAX);
        let prefix = req.partition.as_deref().map(partition_hash);
        let (low, high) = scan_bounds(prefix, t0, t1);

        // Group consecutive keys into splits of roughly equal byte
        // size, never breaking up a single block.
        let mut splits: Vec<Split> = Vec::new();
        let mut split_low: Option<Vec<u8>> = None;
        let mut split_last: Vec<u8> = Vec::new();
        let mut split_bytes = 0usize;

        self.store.range(&low, &high, &mut |key, value| {
            // Without a partition prefix the scan covers the whole
            // keyspace, so the time window applies per key.
            if prefix.is_none() {
                match BlockKey::time_of(key) {
                    Ok(t) if t >= t0 && t < t1 => {}
                    _ => return Scan::Continue,
                }
            }

            if split_low.is_none() {
                split_low = Some(key.to_vec());
            }
            split_last = key.to_vec();
            split_bytes += value.len();

            if split_bytes >= SPLIT_TARGET_BYTES {
                splits.push(Split {
                    low: split_low.take().unwrap(),
                    high: key_successor(&split_last),
                    t0,
                    t1,
                });
                split_bytes = 0;
            }
            Scan::Continue
        })?;

        if let Some(first) = split_low {
            splits.push(Split {
                low: first,
                high: key_successor(&split_last),
                t0,
                t1,
            });
        }

        let ring = HashRing::new(self.cluster.members().into_iter().map(|m| m.address));
        Ok(splits
            .into_iter()
            .map(|s| {
                let host = ring.assign(&s.low).map(str::to_string);
                AssignedSplit {
                    token: s.encode(),
                    host,
                }
            })
            .collect())
    }

    async fn read_split(&self, token: &[u8], columns: &[String]) -> Result<Vec<Page>> {
        let split = Split::decode(token)?;
        let entries = self.scan_raw(&split.low, &split.high)?;

        let mut pages = Vec::new();
        for (key, payload) in entries {
            // The same key-level window applied at enumeration time:
            // an all-partition split range can interleave keys whose
            // time component falls outside it.
            match BlockKey::time_of(&key) {
                Ok(t) if t >= split.t0 && t < split.t1 => {}
                _ => continue,
            }
            let block = Block::decode(&payload)?;
            if let Some(page) = materialise(&block, &self.config.time_column, split.t0, split.t1, columns)? {
                pages.push(page);
            }
        }
        Ok(pages)
    }
}

/// Project one block into a page, keeping only rows whose event time is
/// in `[t0, t1)`. Returns `None` when no row survives.
fn materialise(
    block: &Block,
    time_column: &str,
    t0: i64,
    t1: i64,
    columns: &[String],
) -> Result<Option<Page>> {
    let (_, times) = block.column(time_column).ok_or_else(|| {
        eventlake_core::Error::SchemaMismatch(format!("time column {time_column} not found"))
    })?;

    let rows: Vec<usize> = (0..block.row_count())
        .filter(|&r| matches!(times.value(r), Some(Value::Timestamp(t)) if t >= t0 && t < t1))
        .collect();
    if rows.is_empty() {
        return Ok(None);
    }

    let selected: Vec<(Column, eventlake_core::ColumnData)> = if columns.is_empty() {
        block
            .columns()
            .iter()
            .map(|(c, d)| (c.clone(), d.take(&rows)))
            .collect()
    } else {
        let mut out = Vec::with_capacity(columns.len());
        for name in columns {
            let (c, d) = block
                .column(name)
                .ok_or_else(|| StoreError::ColumnNotFound(name.clone()))?;
            out.push((c.clone(), d.take(&rows)));
        }
        out
    };

    Ok(Some(Page {
        columns: selected,
        row_count: rows.len(),
    }))
}

/// Smallest key strictly greater than `key`.
fn key_successor(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0);
    next
}
