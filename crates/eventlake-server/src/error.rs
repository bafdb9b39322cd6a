use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad or missing configuration. Always fatal at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error(transparent)]
    Store(#[from] eventlake_store::StoreError),

    #[error(transparent)]
    Cluster(#[from] eventlake_cluster::ClusterError),

    #[error(transparent)]
    Codec(#[from] eventlake_core::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
