//! Native columnar file format.
//!
//! This is the format producers upload to object storage and the input
//! to [`crate::block::from_columnar_by`]. It is self-describing: the
//! schema travels with the file.
//!
//! ## File structure
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ Magic "ELCF" (4 bytes)                     │
//! │ Version: 1 (2 bytes)                       │
//! │ Column count (2 bytes) | Row count (4)     │
//! ├────────────────────────────────────────────┤
//! │ Per column: u16 name length + name | type  │
//! ├────────────────────────────────────────────┤
//! │ Per column: ColumnData encoding            │
//! ├────────────────────────────────────────────┤
//! │ CRC32 over everything above (4 bytes)      │
//! └────────────────────────────────────────────┘
//! ```
//!
//! The CRC detects corruption from the network or object store before
//! any row is interpreted.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::column::ColumnData;
use crate::error::{Error, Result};
use crate::schema::{Column, ColumnType, Schema};
use crate::value::Value;

const FILE_MAGIC: &[u8; 4] = b"ELCF";
const FILE_VERSION: u16 = 1;

/// Builds a columnar file from full-width rows.
pub struct FileWriter {
    schema: Schema,
    columns: Vec<ColumnData>,
    rows: usize,
}

impl FileWriter {
    pub fn new(schema: Schema) -> Self {
        let columns = schema
            .columns()
            .iter()
            .map(|c| ColumnData::new(c.kind))
            .collect();
        Self {
            schema,
            columns,
            rows: 0,
        }
    }

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

    pub fn finish(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64 + self.rows * 16);
        buf.put_slice(FILE_MAGIC);
        buf.put_u16(FILE_VERSION);
        buf.put_u16(self.schema.len() as u16);
        buf.put_u32(self.rows as u32);
        for column in self.schema.columns() {
            buf.put_u16(column.name.len() as u16);
            buf.put_slice(column.name.as_bytes());
            buf.put_u8(column.kind.code());
        }
        for data in &self.columns {
            data.encode(&mut buf);
        }
        let crc = crc32fast::hash(&buf);
        buf.put_u32(crc);
        buf.freeze()
    }
}

/// A decoded columnar file: schema plus row access.
pub struct FileReader {
    schema: Schema,
    columns: Vec<ColumnData>,
    rows: usize,
}

impl FileReader {
    /// Check whether `payload` starts with the columnar file magic.
    pub fn sniff(payload: &[u8]) -> bool {
        payload.len() >= 4 && &payload[..4] == FILE_MAGIC
    }

    /// Validate and decode a columnar file.
    pub fn open(payload: &[u8]) -> Result<FileReader> {
        if payload.len() < 4 + 2 + 2 + 4 + 4 {
            return Err(Error::Truncated("file header"));
        }
        let (body, trailer) = payload.split_at(payload.len() - 4);
        let stored_crc = u32::from_be_bytes(trailer.try_into().unwrap());
        if crc32fast::hash(body) != stored_crc {
            return Err(Error::CrcMismatch);
        }

        let mut buf = body;
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != FILE_MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = buf.get_u16();
        if version != FILE_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let column_count = buf.get_u16() as usize;
        let rows = buf.get_u32() as usize;

        let mut columns_meta = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            if buf.remaining() < 2 {
                return Err(Error::Truncated("file schema"));
            }
            let len = buf.get_u16() as usize;
            if buf.remaining() < len + 1 {
                return Err(Error::Truncated("file schema"));
            }
            let name = String::from_utf8(buf.copy_to_bytes(len).to_vec())
                .map_err(|_| Error::InvalidBlock("non-utf8 column name".into()))?;
            let kind = ColumnType::from_code(buf.get_u8())?;
            columns_meta.push(Column::new(name, kind));
        }

        let mut columns = Vec::with_capacity(column_count);
        for column in &columns_meta {
            columns.push(ColumnData::decode(column.kind, rows, &mut buf)?);
        }

        Ok(FileReader {
            schema: Schema::new(columns_meta),
            columns,
            rows,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Materialise one full-width row.
    pub fn row(&self, idx: usize) -> Vec<Option<Value>> {
        self.columns.iter().map(|c| c.value(idx)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Column::new("name", ColumnType::String),
            Column::new("score", ColumnType::Float64),
        ])
    }

    fn sample_file() -> Bytes {
        let mut writer = FileWriter::new(sample_schema());
        writer
            .push_row(vec![
                Some(Value::String("ada".into())),
                Some(Value::Float64(9.5)),
            ])
            .unwrap();
        writer
            .push_row(vec![Some(Value::String("bo".into())), None])
            .unwrap();
        writer.finish()
    }

    #[test]
    fn test_roundtrip() {
        let reader = FileReader::open(&sample_file()).unwrap();
        assert_eq!(reader.schema(), &sample_schema());
        assert_eq!(reader.row_count(), 2);
        assert_eq!(
            reader.row(0),
            vec![Some(Value::String("ada".into())), Some(Value::Float64(9.5))]
        );
        assert_eq!(reader.row(1), vec![Some(Value::String("bo".into())), None]);
    }

    #[test]
    fn test_sniff() {
        assert!(FileReader::sniff(&sample_file()));
        assert!(!FileReader::sniff(b"PAR1whatever"));
        assert!(!FileReader::sniff(b"EL"));
    }

    #[test]
    fn test_empty_file_roundtrip() {
        let writer = FileWriter::new(sample_schema());
        let reader = FileReader::open(&writer.finish()).unwrap();
        assert_eq!(reader.row_count(), 0);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = sample_file().to_vec();
        bytes[0] = b'X';
        // CRC is computed over the body, so flip it too to reach the
        // magic check.
        let crc = crc32fast::hash(&bytes[..bytes.len() - 4]);
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&crc.to_be_bytes());
        assert!(matches!(
            FileReader::open(&bytes),
            Err(Error::InvalidMagic)
        ));
    }

    #[test]
    fn test_corruption_detected_by_crc() {
        let mut bytes = sample_file().to_vec();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(FileReader::open(&bytes), Err(Error::CrcMismatch)));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = sample_file().to_vec();
        bytes[5] = 99;
        let crc = crc32fast::hash(&bytes[..bytes.len() - 4]);
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&crc.to_be_bytes());
        assert!(matches!(
            FileReader::open(&bytes),
            Err(Error::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_push_row_width_mismatch() {
        let mut writer = FileWriter::new(sample_schema());
        assert!(writer
            .push_row(vec![Some(Value::String("only-one".into()))])
            .is_err());
    }
}
