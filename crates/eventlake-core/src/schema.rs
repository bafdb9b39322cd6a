//! Column types and schemas.
//!
//! A schema is an ordered list of `(name, type)` pairs read from the
//! input file itself. The supported types are the six the exchange
//! protocol speaks; anything else is rejected at decode time.
//!
//! Schemas carry a SHA-256 fingerprint so blocks written from files with
//! identical layouts can be recognised as such without comparing column
//! lists.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// The closed set of column types eventlake understands.
///
/// `Timestamp` values are nanoseconds since the Unix epoch. `Json` holds
/// an opaque string with an encoded nested value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int64,
    Float64,
    String,
    Bool,
    Timestamp,
    Json,
}

impl ColumnType {
    /// Wire code used in block payloads and columnar files.
    pub fn code(self) -> u8 {
        match self {
            ColumnType::Int64 => 1,
            ColumnType::Float64 => 2,
            ColumnType::String => 3,
            ColumnType::Bool => 4,
            ColumnType::Timestamp => 5,
            ColumnType::Json => 6,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            1 => ColumnType::Int64,
            2 => ColumnType::Float64,
            3 => ColumnType::String,
            4 => ColumnType::Bool,
            5 => ColumnType::Timestamp,
            6 => ColumnType::Json,
            other => return Err(Error::UnsupportedType(format!("code {other}"))),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::String => "string",
            ColumnType::Bool => "bool",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "int64" => ColumnType::Int64,
            "float64" => ColumnType::Float64,
            "string" => ColumnType::String,
            "bool" => ColumnType::Bool,
            "timestamp" => ColumnType::Timestamp,
            "json" => ColumnType::Json,
            other => return Err(Error::UnsupportedType(other.to_string())),
        })
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// An ordered list of columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// SHA-256 over the ordered `(name, type)` list.
    ///
    /// Two files with the same column names and types in the same order
    /// produce the same fingerprint.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for column in &self.columns {
            hasher.update(column.name.as_bytes());
            hasher.update([0u8, column.kind.code()]);
        }
        hasher.finalize().into()
    }
}
