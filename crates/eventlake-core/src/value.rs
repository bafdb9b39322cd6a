//! The tagged value variant exchanged at API boundaries.
//!
//! Decoders produce `Option<Value>` cells (`None` is a null); nothing
//! downstream ever sees a dynamically typed any-value.

use bytes::Bytes;

use crate::schema::ColumnType;

/// A single typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int64(i64),
    Float64(f64),
    Bool(bool),
    String(String),
    /// Nanoseconds since the Unix epoch.
    Timestamp(i64),
    /// Opaque encoded JSON bytes.
    Json(Bytes),
}

impl Value {
    pub fn kind(&self) -> ColumnType {
        match self {
            Value::Int64(_) => ColumnType::Int64,
            Value::Float64(_) => ColumnType::Float64,
            Value::Bool(_) => ColumnType::Bool,
            Value::String(_) => ColumnType::String,
            Value::Timestamp(_) => ColumnType::Timestamp,
            Value::Json(_) => ColumnType::Json,
        }
    }

    /// Render this value as a partition key.
    ///
    /// Only strings and 64-bit integers qualify; everything else (and
    /// nulls, handled by the caller) causes the row to be dropped.
    pub fn as_partition_key(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int64(v) => Some(v.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind() {
        assert_eq!(Value::Int64(1).kind(), ColumnType::Int64);
        assert_eq!(Value::Timestamp(1).kind(), ColumnType::Timestamp);
        assert_eq!(Value::Json(Bytes::from("{}")).kind(), ColumnType::Json);
    }

    #[test]
    fn test_partition_key_string() {
        assert_eq!(
            Value::String("tile-21".into()).as_partition_key(),
            Some("tile-21".to_string())
        );
    }

    #[test]
    fn test_partition_key_int() {
        assert_eq!(Value::Int64(-7).as_partition_key(), Some("-7".to_string()));
    }

    #[test]
    fn test_partition_key_rejects_other_types() {
        assert_eq!(Value::Float64(1.0).as_partition_key(), None);
        assert_eq!(Value::Bool(true).as_partition_key(), None);
        assert_eq!(Value::Timestamp(9).as_partition_key(), None);
    }
}
