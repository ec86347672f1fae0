#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::module_name_repetitions)]

//! Delivery core of a Splunk HTTP Event Collector (HEC) output.
//!
//! The host buffer formats records into chunks with
//! [`sinks::splunk_hec::HecFormatter`] at enqueue time and later hands every
//! chunk to [`sinks::splunk_hec::HecSink::deliver`], which either commits it,
//! registers it for indexer acknowledgement, or returns a retryable error.

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;

pub mod buffers;
pub mod config;
pub mod event;
pub mod http;
pub mod sinks;
pub mod template;
#[cfg(test)]
pub mod test_util;
pub mod tls;
pub mod trace;

pub use buffers::{Chunk, ChunkAcker, ChunkId};
pub use event::{EventTime, Record, Value};

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn get_hostname() -> std::io::Result<String> {
    Ok(hostname::get()?.to_string_lossy().into())
}
