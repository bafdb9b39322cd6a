//! Ingestion pipeline for eventlake.
//!
//! Object storage is the source of truth; a notification queue
//! announces each newly uploaded columnar file. This crate glues the
//! two to the local store:
//!
//! ```text
//! queue → fetch (bounded, retried) → Appender (decode + repartition + append)
//! ```
//!
//! - [`queue`]: long-polling reader over a [`queue::NotificationQueue`]
//!   trait; messages carry ack/extend handles and redeliver unless acked
//! - [`notification`]: object-storage event payload parsing
//! - [`fetch`]: semaphore-bounded object fetches with exponential
//!   backoff and permanent/transient classification
//! - [`ingest`]: the cancellable loop; acks only after every block of
//!   a message appended
//!
//! Delivery is at-least-once end to end: anything that fails before the
//! final append leaves the message unacked for redelivery.

pub mod error;
pub mod fetch;
pub mod ingest;
pub mod notification;
pub mod queue;
pub mod spool;

pub use error::{IngestError, Result};
pub use fetch::{FetchConfig, Fetcher, RetryPolicy, StoreFactory};
pub use ingest::{Appender, Ingestor};
pub use notification::ObjectRef;
pub use queue::{Message, MemoryQueue, NotificationQueue, QueueConfig, QueueReader, RawMessage};
pub use spool::SpoolQueue;
