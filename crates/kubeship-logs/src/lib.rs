//! Log file engine for kubeship
//!
//! This crate discovers log files, tails them with resumable checkpoints and
//! hands every line through a source handler to a set of target handlers.

mod cache;
mod error;
mod follow;
mod handler;
mod parser;
mod pipeline;
mod position;
mod raw;
mod source;
mod tailer;

#[cfg(test)]
mod test_support;

pub use cache::{CachedFuture, TtlCache};
pub use error::TailError;
pub use follow::{FileFollower, StartAt};
pub use handler::{SourceHandler, TargetHandler};
pub use parser::{LineParser, guess_severity};
pub use pipeline::{LineOutcome, Pipeline};
pub use position::CheckpointFile;
pub use raw::RawSource;
pub use source::{DEFAULT_POLL_INTERVAL, DEFAULT_REFRESH_INTERVAL, Source, SourceConfig};
pub use tailer::{MIN_POLL_INTERVAL, SourceTail, TailListener, TailState, TailerState};

// Re-export types used in our public API
pub use kubeship_types::{LogFields, LogRecord, PositionPolicy, RecordBody, Severity};
