//! Columnar blocks and the repartitioning codec.
//!
//! A block is an immutable columnar batch of at most [`MAX_ROWS`] rows,
//! all sharing one partition-key value. [`from_columnar_by`] turns an
//! uploaded columnar file into a set of blocks, repartitioned by the
//! configured partition column: rows stream into per-partition builders,
//! and a builder is sealed and evicted the moment it fills.
//!
//! Time bounds are not known to this codec (it only knows the partition
//! column); the table's append path computes them from the configured
//! time column via [`Block::with_time_bounds`] before the block is keyed
//! and serialised.
//!
//! ## Payload encoding
//!
//! Column-at-a-time, length-prefixed:
//!
//! ```text
//! u16 partition length + partition bytes
//! 32-byte schema fingerprint
//! u32 row count | i64 min time | i64 max time
//! u16 column count
//! per column: u16 name length + name | u8 type code
//! per column: ColumnData encoding (see column module)
//! ```

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json as json;

use crate::column::ColumnData;
use crate::error::{Error, Result};
use crate::file::FileReader;
use crate::schema::{Column, ColumnType, Schema};
use crate::value::Value;

/// Hard cap on rows per block.
pub const MAX_ROWS: usize = 10_000;

/// An immutable, single-partition columnar batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    partition: String,
    fingerprint: [u8; 32],
    row_count: usize,
    min_time: i64,
    max_time: i64,
    columns: Vec<(Column, ColumnData)>,
}

impl Block {
    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// `(min, max)` of the designated time column. Only meaningful after
    /// [`Block::with_time_bounds`] or a decode.
    pub fn time_bounds(&self) -> (i64, i64) {
        (self.min_time, self.max_time)
    }

    pub fn columns(&self) -> &[(Column, ColumnData)] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&(Column, ColumnData)> {
        self.columns.iter().find(|(c, _)| c.name == name)
    }

    /// Compute min/max of `time_column` over every row and return the
    /// block with its bounds set.
    ///
    /// Fails with `SchemaMismatch` when the column is absent, not a
    /// timestamp, or holds a null (a null event time cannot be bounded).
    pub fn with_time_bounds(mut self, time_column: &str) -> Result<Block> {
        let (column, data) = self
            .column(time_column)
            .ok_or_else(|| Error::SchemaMismatch(format!("time column {time_column} not found")))?;
        if column.kind != ColumnType::Timestamp {
            return Err(Error::SchemaMismatch(format!(
                "time column {time_column} has type {}, expected timestamp",
                column.kind
            )));
        }

        let mut min = i64::MAX;
        let mut max = i64::MIN;
        for row in 0..self.row_count {
            match data.value(row) {
                Some(Value::Timestamp(t)) => {
                    min = min.min(t);
                    max = max.max(t);
                }
                _ => {
                    return Err(Error::SchemaMismatch(format!(
                        "null event time in column {time_column} at row {row}"
                    )))
                }
            }
        }

        self.min_time = min;
        self.max_time = max;
        Ok(self)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256 + self.row_count * 16);
        buf.put_u16(self.partition.len() as u16);
        buf.put_slice(self.partition.as_bytes());
        buf.put_slice(&self.fingerprint);
        buf.put_u32(self.row_count as u32);
        buf.put_i64(self.min_time);
        buf.put_i64(self.max_time);
        buf.put_u16(self.columns.len() as u16);
        for (column, _) in &self.columns {
            buf.put_u16(column.name.len() as u16);
            buf.put_slice(column.name.as_bytes());
            buf.put_u8(column.kind.code());
        }
        for (_, data) in &self.columns {
            data.encode(&mut buf);
        }
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Block> {
        let mut buf = payload;
        let partition = get_string16(&mut buf, "block partition")?;

        if buf.remaining() < 32 + 4 + 8 + 8 + 2 {
            return Err(Error::Truncated("block header"));
        }
        let mut fingerprint = [0u8; 32];
        buf.copy_to_slice(&mut fingerprint);
        let row_count = buf.get_u32() as usize;
        let min_time = buf.get_i64();
        let max_time = buf.get_i64();
        let column_count = buf.get_u16() as usize;

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let name = get_string16(&mut buf, "column name")?;
            if buf.remaining() < 1 {
                return Err(Error::Truncated("column type"));
            }
            let kind = ColumnType::from_code(buf.get_u8())?;
            columns.push(Column::new(name, kind));
        }

        let mut decoded = Vec::with_capacity(column_count);
        for column in columns {
            let data = ColumnData::decode(column.kind, row_count, &mut buf)?;
            decoded.push((column, data));
        }

        Ok(Block {
            partition,
            fingerprint,
            row_count,
            min_time,
            max_time,
            columns: decoded,
        })
    }
}

fn get_string16(buf: &mut impl Buf, context: &'static str) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(Error::Truncated(context));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(Error::Truncated(context));
    }
    String::from_utf8(buf.copy_to_bytes(len).to_vec())
        .map_err(|_| Error::InvalidBlock(format!("non-utf8 {context}")))
}

/// Accumulates rows for one partition until sealed.
pub struct BlockBuilder {
    schema: Schema,
    fingerprint: [u8; 32],
    columns: Vec<ColumnData>,
    rows: usize,
}

impl BlockBuilder {
    pub fn new(schema: Schema) -> Self {
        let fingerprint = schema.fingerprint();
        let columns = schema
            .columns()
            .iter()
            .map(|c| ColumnData::new(c.kind))
            .collect();
        Self {
            schema,
            fingerprint,
            columns,
            rows: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Append one full-width row. Cells must already be canonicalised.
    pub fn push_row(&mut self, row: Vec<Option<Value>>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::SchemaMismatch(format!(
                "row has {} cells, schema has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (column, cell) in self.columns.iter_mut().zip(row) {
            column.push(cell)?;
        }
        self.rows += 1;
        Ok(())
    }

    /// Equalise all column lengths to the current row count.
    pub fn fill_nulls(&mut self) {
        for column in &mut self.columns {
            column.pad_to(self.rows);
        }
    }

    /// Seal into an immutable block for `partition`.
    pub fn seal(mut self, partition: String) -> Result<Block> {
        if self.rows == 0 {
            return Err(Error::InvalidBlock("cannot seal an empty block".into()));
        }
        self.fill_nulls();
        let columns = self
            .schema
            .columns()
            .iter()
            .cloned()
            .zip(self.columns)
            .collect();
        Ok(Block {
            partition,
            fingerprint: self.fingerprint,
            row_count: self.rows,
            min_time: 0,
            max_time: 0,
            columns,
        })
    }
}

/// Blocks decoded from one file, plus the count of rows dropped because
/// their partition cell was null or not string/int64.
#[derive(Debug)]
pub struct Repartitioned {
    pub blocks: Vec<Block>,
    pub dropped_rows: usize,
}

/// Decode a columnar file and repartition its rows by `partition_by`.
///
/// Builders seal and evict at [`MAX_ROWS`]; residual builders seal at
/// end-of-input. Nested values in `json` columns are re-encoded as
/// canonical JSON bytes; scalar JSON cells pass through unchanged. Any
/// decode failure is fatal for the whole file and no block is returned.
pub fn from_columnar_by(payload: &[u8], partition_by: &str) -> Result<Repartitioned> {
    let reader = FileReader::open(payload)?;
    let schema = reader.schema().clone();
    let partition_idx = schema
        .index_of(partition_by)
        .ok_or_else(|| Error::PartitionNotFound(partition_by.to_string()))?;

    let json_columns: Vec<usize> = schema
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.kind == ColumnType::Json)
        .map(|(i, _)| i)
        .collect();

    let mut builders: BTreeMap<String, BlockBuilder> = BTreeMap::new();
    let mut blocks = Vec::new();
    let mut dropped_rows = 0usize;

    for row_idx in 0..reader.row_count() {
        let mut row = reader.row(row_idx);

        let partition = match row[partition_idx]
            .as_ref()
            .and_then(Value::as_partition_key)
        {
            Some(p) => p,
            None => {
                dropped_rows += 1;
                continue;
            }
        };

        for &idx in &json_columns {
            row[idx] = match row[idx].take() {
                Some(Value::Json(raw)) => Some(Value::Json(canonicalize_json(&raw)?)),
                other => other,
            };
        }

        let builder = builders
            .entry(partition.clone())
            .or_insert_with(|| BlockBuilder::new(schema.clone()));
        builder.push_row(row)?;

        if builder.len() == MAX_ROWS {
            let full = builders.remove(&partition).unwrap();
            blocks.push(full.seal(partition)?);
        }
    }

    for (partition, builder) in builders {
        if !builder.is_empty() {
            blocks.push(builder.seal(partition)?);
        }
    }

    Ok(Repartitioned {
        blocks,
        dropped_rows,
    })
}

/// Re-encode nested JSON containers canonically; scalars pass through.
fn canonicalize_json(raw: &Bytes) -> Result<Bytes> {
    let parsed: json::Value = json::from_slice(raw)?;
    match parsed {
        json::Value::Object(_) | json::Value::Array(_) => {
            Ok(Bytes::from(json::to_vec(&parsed)?))
        }
        _ => Ok(raw.clone()),
    }
}
