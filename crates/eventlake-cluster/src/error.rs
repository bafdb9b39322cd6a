use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// No seed responded during bootstrap. Startup-fatal.
    #[error("gossip join failed: {0}")]
    JoinFailed(String),

    #[error("gossip transport error: {0}")]
    Transport(String),

    #[error("DNS reconcile failed: {0}")]
    DnsReconcileFailed(String),

    #[error("announcement codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
