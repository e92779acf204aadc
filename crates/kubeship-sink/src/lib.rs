//! Delivery for kubeship
//!
//! This crate provides the buffered sink, the writers behind it and the
//! `cloud_logging` and `console` target handlers.

mod buffer;
mod entry;
mod target;
mod token;
mod writer;

#[cfg(test)]
mod test_support;

pub use buffer::{
    BufferedSink, DEFAULT_FLUSH_MARGIN, DEFAULT_HIGH_WATER_MARK, DEFAULT_IDLE_EXPIRY,
    DEFAULT_WRITE_DELAY, LogWriter, SinkEntry, SinkSettings,
};
pub use entry::{EntryMetadata, GkeEnvironment, MonitoredResource, file_destination};
pub use target::{CloudLoggingTarget, ConsoleTarget};
pub use token::{METADATA_TOKEN_URL, TOKEN_TTL, TokenSource};
pub use writer::{DEFAULT_ENDPOINT, HttpLogWriter, StdoutWriter, http_client};
