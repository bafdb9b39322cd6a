//! Local storage and tables for eventlake.
//!
//! Blocks land in a sorted embedded KV store ([`kv::DiskStore`], a thin
//! rocksdb adapter) under composite `(partition hash, time, sequence)`
//! keys, so a ranged scan in key order is a chronological scan within a
//! partition. Two [`table::Table`]s sit on top:
//!
//! - [`timeseries::TimeSeries`]: the event log with append path, split
//!   enumeration aligned to the query engine's split model, page
//!   materialisation, and a TTL [`sweep::Sweeper`]
//! - [`nodes::NodesTable`]: a read-only view of cluster membership
//!
//! Data is canonical in object storage; this store is the serving tier.

pub mod error;
pub mod kv;
pub mod nodes;
pub mod split;
pub mod sweep;
pub mod table;
pub mod timeseries;

pub use error::{Result, StoreError};
pub use kv::{DiskStore, Scan, Store};
pub use nodes::NodesTable;
pub use split::{Split, SPLIT_TARGET_BYTES};
pub use sweep::{Sweeper, SWEEP_INTERVAL};
pub use table::{AssignedSplit, Page, SplitRequest, Table, TableMeta};
pub use timeseries::{TimeSeries, TimeSeriesConfig};
