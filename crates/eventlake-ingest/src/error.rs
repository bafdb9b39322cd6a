use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The object can never be fetched (missing, forbidden). The
    /// message is acked as a poison pill and counted.
    #[error("permanent fetch failure for {location}: {reason}")]
    PermanentFetch { location: String, reason: String },

    /// Retries exhausted on a transient failure; the message stays
    /// unacked so the queue redelivers.
    #[error("transient fetch failure for {location}: {reason}")]
    TransientFetch { location: String, reason: String },

    #[error("queue error: {0}")]
    Queue(String),

    /// The notification payload is not an object-storage event.
    #[error("malformed notification: {0}")]
    MalformedNotification(String),

    /// Decode or append failed downstream; the message stays unacked.
    #[error("append failed: {0}")]
    Append(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
