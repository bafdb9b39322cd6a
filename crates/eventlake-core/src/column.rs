//! Typed per-column arrays.
//!
//! `ColumnData` is the in-memory representation of one column of a block
//! or file: a dense value vector plus a null vector of the same length.
//! Null slots keep a zero placeholder in the value vector so offsets stay
//! aligned.
//!
//! ## Wire encoding
//!
//! Columns encode without their own length header; the caller supplies
//! the row count on decode. Layout per type:
//!
//! ```text
//! nulls:  row_count bytes, 1 = null
//! int64 / timestamp:  row_count * 8 bytes big-endian
//! float64:            row_count * 8 bytes big-endian IEEE-754 bits
//! bool:               row_count bytes
//! string / json:      per row: u32 length + bytes
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::schema::ColumnType;
use crate::value::Value;

/// One column's worth of cells: values plus a null mask.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int64 { values: Vec<i64>, nulls: Vec<bool> },
    Float64 { values: Vec<f64>, nulls: Vec<bool> },
    Bool { values: Vec<bool>, nulls: Vec<bool> },
    String { values: Vec<String>, nulls: Vec<bool> },
    Timestamp { values: Vec<i64>, nulls: Vec<bool> },
    Json { values: Vec<Bytes>, nulls: Vec<bool> },
}

impl ColumnData {
    pub fn new(kind: ColumnType) -> Self {
        match kind {
            ColumnType::Int64 => ColumnData::Int64 {
                values: Vec::new(),
                nulls: Vec::new(),
            },
            ColumnType::Float64 => ColumnData::Float64 {
                values: Vec::new(),
                nulls: Vec::new(),
            },
            ColumnType::Bool => ColumnData::Bool {
                values: Vec::new(),
                nulls: Vec::new(),
            },
            ColumnType::String => ColumnData::String {
                values: Vec::new(),
                nulls: Vec::new(),
            },
            ColumnType::Timestamp => ColumnData::Timestamp {
                values: Vec::new(),
                nulls: Vec::new(),
            },
            ColumnType::Json => ColumnData::Json {
                values: Vec::new(),
                nulls: Vec::new(),
            },
        }
    }

    pub fn kind(&self) -> ColumnType {
        match self {
            ColumnData::Int64 { .. } => ColumnType::Int64,
            ColumnData::Float64 { .. } => ColumnType::Float64,
            ColumnData::Bool { .. } => ColumnType::Bool,
            ColumnData::String { .. } => ColumnType::String,
            ColumnData::Timestamp { .. } => ColumnType::Timestamp,
            ColumnData::Json { .. } => ColumnType::Json,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int64 { nulls, .. }
            | ColumnData::Float64 { nulls, .. }
            | ColumnData::Bool { nulls, .. }
            | ColumnData::String { nulls, .. }
            | ColumnData::Timestamp { nulls, .. }
            | ColumnData::Json { nulls, .. } => nulls.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a cell; `None` appends a null.
    ///
    /// The cell type must match the column type exactly.
    pub fn push(&mut self, cell: Option<Value>) -> Result<()> {
        match (self, cell) {
            (ColumnData::Int64 { values, nulls }, Some(Value::Int64(v))) => {
                values.push(v);
                nulls.push(false);
            }
            (ColumnData::Int64 { values, nulls }, None) => {
                values.push(0);
                nulls.push(true);
            }
            (ColumnData::Float64 { values, nulls }, Some(Value::Float64(v))) => {
                values.push(v);
                nulls.push(false);
            }
            (ColumnData::Float64 { values, nulls }, None) => {
                values.push(0.0);
                nulls.push(true);
            }
            (ColumnData::Bool { values, nulls }, Some(Value::Bool(v))) => {
                values.push(v);
                nulls.push(false);
            }
            (ColumnData::Bool { values, nulls }, None) => {
                values.push(false);
                nulls.push(true);
            }
            (ColumnData::String { values, nulls }, Some(Value::String(v))) => {
                values.push(v);
                nulls.push(false);
            }
            (ColumnData::String { values, nulls }, None) => {
                values.push(String::new());
                nulls.push(true);
            }
            (ColumnData::Timestamp { values, nulls }, Some(Value::Timestamp(v))) => {
                values.push(v);
                nulls.push(false);
            }
            (ColumnData::Timestamp { values, nulls }, None) => {
                values.push(0);
                nulls.push(true);
            }
            (ColumnData::Json { values, nulls }, Some(Value::Json(v))) => {
                values.push(v);
                nulls.push(false);
            }
            (ColumnData::Json { values, nulls }, None) => {
                values.push(Bytes::new());
                nulls.push(true);
            }
            (col, Some(v)) => {
                return Err(Error::SchemaMismatch(format!(
                    "cannot append {} cell to {} column",
                    v.kind(),
                    col.kind()
                )))
            }
        }
        Ok(())
    }

    /// Back-fill nulls until the column holds `row_count` cells.
    pub fn pad_to(&mut self, row_count: usize) {
        while self.len() < row_count {
            // push(None) cannot fail
            let _ = self.push(None);
        }
    }

    /// Cell at `row`, or `None` for nulls and out-of-range rows.
    pub fn value(&self, row: usize) -> Option<Value> {
        if row >= self.len() || self.null_at(row) {
            return None;
        }
        Some(match self {
            ColumnData::Int64 { values, .. } => Value::Int64(values[row]),
            ColumnData::Float64 { values, .. } => Value::Float64(values[row]),
            ColumnData::Bool { values, .. } => Value::Bool(values[row]),
            ColumnData::String { values, .. } => Value::String(values[row].clone()),
            ColumnData::Timestamp { values, .. } => Value::Timestamp(values[row]),
            ColumnData::Json { values, .. } => Value::Json(values[row].clone()),
        })
    }

    fn null_at(&self, row: usize) -> bool {
        match self {
            ColumnData::Int64 { nulls, .. }
            | ColumnData::Float64 { nulls, .. }
            | ColumnData::Bool { nulls, .. }
            | ColumnData::String { nulls, .. }
            | ColumnData::Timestamp { nulls, .. }
            | ColumnData::Json { nulls, .. } => nulls[row],
        }
    }

    /// Copy out the cells at `rows`, preserving their order.
    pub fn take(&self, rows: &[usize]) -> ColumnData {
        let mut out = ColumnData::new(self.kind());
        for &row in rows {
            let _ = out.push(self.value(row));
        }
        out
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            ColumnData::Int64 { values, nulls } | ColumnData::Timestamp { values, nulls } => {
                put_nulls(buf, nulls);
                for v in values {
                    buf.put_i64(*v);
                }
            }
            ColumnData::Float64 { values, nulls } => {
                put_nulls(buf, nulls);
                for v in values {
                    buf.put_u64(v.to_bits());
                }
            }
            ColumnData::Bool { values, nulls } => {
                put_nulls(buf, nulls);
                for v in values {
                    buf.put_u8(*v as u8);
                }
            }
            ColumnData::String { values, nulls } => {
                put_nulls(buf, nulls);
                for v in values {
                    buf.put_u32(v.len() as u32);
                    buf.put_slice(v.as_bytes());
                }
            }
            ColumnData::Json { values, nulls } => {
                put_nulls(buf, nulls);
                for v in values {
                    buf.put_u32(v.len() as u32);
                    buf.put_slice(v);
                }
            }
        }
    }

    pub fn decode(kind: ColumnType, row_count: usize, buf: &mut impl Buf) -> Result<Self> {
        let nulls = get_nulls(buf, row_count)?;
        Ok(match kind {
            ColumnType::Int64 | ColumnType::Timestamp => {
                let mut values = Vec::with_capacity(row_count);
                for _ in 0..row_count {
                    ensure(buf, 8, "int64 column")?;
                    values.push(buf.get_i64());
                }
                if kind == ColumnType::Int64 {
                    ColumnData::Int64 { values, nulls }
                } else {
                    ColumnData::Timestamp { values, nulls }
                }
            }
            ColumnType::Float64 => {
                let mut values = Vec::with_capacity(row_count);
                for _ in 0..row_count {
                    ensure(buf, 8, "float64 column")?;
                    values.push(f64::from_bits(buf.get_u64()));
                }
                ColumnData::Float64 { values, nulls }
            }
            ColumnType::Bool => {
                let mut values = Vec::with_capacity(row_count);
                for _ in 0..row_count {
                    ensure(buf, 1, "bool column")?;
                    values.push(buf.get_u8() != 0);
                }
                ColumnData::Bool { values, nulls }
            }
            ColumnType::String => {
                let mut values = Vec::with_capacity(row_count);
                for _ in 0..row_count {
                    let bytes = get_len_prefixed(buf, "string column")?;
                    let text = String::from_utf8(bytes.to_vec())
                        .map_err(|_| Error::InvalidBlock("non-utf8 string cell".into()))?;
                    values.push(text);
                }
                ColumnData::String { values, nulls }
            }
            ColumnType::Json => {
                let mut values = Vec::with_capacity(row_count);
                for _ in 0..row_count {
                    values.push(get_len_prefixed(buf, "json column")?);
                }
                ColumnData::Json { values, nulls }
            }
        })
    }
}

fn put_nulls(buf: &mut BytesMut, nulls: &[bool]) {
    for n in nulls {
        buf.put_u8(*n as u8);
    }
}

fn get_nulls(buf: &mut impl Buf, row_count: usize) -> Result<Vec<bool>> {
    ensure(buf, row_count, "null mask")?;
    let mut nulls = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        nulls.push(buf.get_u8() != 0);
    }
    Ok(nulls)
}

fn get_len_prefixed(buf: &mut impl Buf, context: &'static str) -> Result<Bytes> {
    ensure(buf, 4, context)?;
    let len = buf.get_u32() as usize;
    ensure(buf, len, context)?;
    Ok(buf.copy_to_bytes(len))
}

fn ensure(buf: &impl Buf, needed: usize, context: &'static str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(Error::Truncated(context));
    }
    Ok(())
}
