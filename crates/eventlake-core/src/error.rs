//! Error types shared by the core codecs.
//!
//! Everything in this crate returns `Result<T>` aliased to
//! `Result<T, Error>`, so callers can propagate with `?`. Decode errors
//! are deliberately coarse: a file that fails to decode is dropped as a
//! whole, so there is no per-row error channel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("CRC mismatch")]
    CrcMismatch,

    #[error("Truncated input while decoding {0}")]
    Truncated(&'static str),

    #[error("Unsupported column type: {0}")]
    UnsupportedType(String),

    #[error("Partition column not found: {0}")]
    PartitionNotFound(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid key: expected {expected} bytes, got {got}")]
    InvalidKey { expected: usize, got: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
