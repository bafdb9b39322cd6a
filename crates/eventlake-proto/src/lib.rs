//! Generated exchange-protocol types.
//!
//! The `Exchange` service is the whole query surface: metadata, split
//! enumeration, streamed page fetches, and the append entry point the
//! ingestion loop uses. See `proto/exchange.proto` for the wire
//! contract.

pub mod exchange {
    tonic::include_proto!("eventlake");
}
