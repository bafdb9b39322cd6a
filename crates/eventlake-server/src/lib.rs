//! The eventlake node binary's library surface.
//!
//! Wires every subsystem together: the [`service::ExchangeService`]
//! answers the query engine's metadata, split and page calls and
//! implements the `Appender` capability the ingestion loop feeds;
//! [`config`] loads the node configuration from `TALARIA_CONF`;
//! [`metrics`] exposes Prometheus counters; [`shutdown`] owns the
//! signal-driven shutdown sequence.

pub mod config;
pub mod error;
pub mod metrics;
pub mod page;
pub mod service;
pub mod shutdown;

pub use config::Config;
pub use error::{Result, ServerError};
pub use service::ExchangeService;
pub use shutdown::Shutdown;
