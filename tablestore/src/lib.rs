//! Client core for a wide-column NoSQL table store: the asynchronous
//! request pipeline (spec.md section 1, subsystem 1).
//!
//! This crate owns the value/row data model, the slab-allocated memory
//! pool, the actor runtime and deadline timers, the HTTP/1.1 transport, the
//! request-signing envelope, the typed [`client::WireClient`] surface, the
//! retry policy and the error taxonomy. The statically-indexed table
//! overlay (spec.md section 4.7) is a separate crate, `tablestore-index`,
//! that depends on this one only through [`client::WireClient`] and the
//! [`value`] types — the same boundary the original C++ SDK draws between
//! `tablestore/core/` and `ots_static_index/`.

pub mod actor;
pub mod bulk;
pub mod client;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod mempool;
pub mod pipeline;
pub mod retry;
pub mod schema;
pub mod signing;
pub mod transport;
pub mod value;
pub mod wire_convert;

/// Generated protobuf message types (spec.md section 6: "Bodies and
/// responses are protobuf-encoded request/response messages; the library
/// treats them as opaque byte sequences above protobuf").
pub mod wire {
    #![allow(clippy::all)]
    include!(concat!(env!("OUT_DIR"), "/tablestore.wire.rs"));
}

pub use bulk::BulkCoordinator;
pub use client::{Client, ClientBuilder, ClientOptions, WireClient};
pub use credentials::Credentials;
pub use error::Error;
pub use transport::uri::Endpoint;
