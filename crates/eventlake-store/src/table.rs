//! The table seam the query server dispatches through.
//!
//! Both the event log and the nodes view implement [`Table`]; the
//! server routes metadata, split-enumeration and page-fetch calls here
//! without knowing which is which. Appends default to unsupported so
//! read-only tables only implement the read path.

use async_trait::async_trait;

use eventlake_core::{Block, Column, ColumnData};

use crate::error::{Result, StoreError};

/// Table metadata served to the query engine.
#[derive(Debug, Clone)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<Column>,
}

/// Split enumeration request: an optional `[t0, t1)` time range in
/// nanoseconds and an optional exact partition filter.
#[derive(Debug, Clone, Default)]
pub struct SplitRequest {
    pub t0: Option<i64>,
    pub t1: Option<i64>,
    pub partition: Option<String>,
}

/// A split token plus its advisory host. Any node may serve any split;
/// the host only steers the scheduler.
#[derive(Debug, Clone)]
pub struct AssignedSplit {
    pub token: Vec<u8>,
    pub host: Option<String>,
}

/// One streamed page of columnar results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub columns: Vec<(Column, ColumnData)>,
    pub row_count: usize,
}

#[async_trait]
pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    fn meta(&self) -> TableMeta;

    /// Enumerate split tokens for the request.
    async fn splits(&self, req: &SplitRequest) -> Result<Vec<AssignedSplit>>;

    /// Materialise the pages of one split, projected to `columns`
    /// (empty means all).
    async fn read_split(&self, token: &[u8], columns: &[String]) -> Result<Vec<Page>>;

    /// Append a sealed block. Read-only tables reject this.
    async fn append(&self, block: Block) -> Result<()> {
        let _ = block;
        Err(StoreError::AppendUnsupported(self.name().to_string()))
    }
}
