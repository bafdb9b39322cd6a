use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The embedded store rejected an operation. Fatal at startup;
    /// surfaced to the caller at runtime.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("invalid split token")]
    InvalidSplit,

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("table {0} does not accept appends")]
    AppendUnsupported(String),

    #[error(transparent)]
    Codec(#[from] eventlake_core::Error),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
