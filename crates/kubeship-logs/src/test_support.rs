//! In-memory handlers and listeners for the engine tests

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::bail;
use async_trait::async_trait;
use kubeship_types::LogRecord;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{Barrier, mpsc};

use crate::error::TailError;
use crate::handler::{SourceHandler, TargetHandler};
use crate::tailer::TailListener;

/// Wraps each line as `{"line": ..., "position": ...}`
pub struct EchoSource;

#[async_trait]
impl SourceHandler for EchoSource {
    fn kind(&self) -> &'static str {
        "echo"
    }

    async fn read_line(&self, _file: &Path, line: &str, position: u64) -> anyhow::Result<LogRecord> {
        let mut record = LogRecord::new();
        record.insert("line", json!(line));
        record.insert("position", json!(position));
        Ok(record)
    }
}

pub struct FailingSource;

#[async_trait]
impl SourceHandler for FailingSource {
    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn read_line(&self, file: &Path, _line: &str, _position: u64) -> anyhow::Result<LogRecord> {
        bail!("cannot enrich {}", file.display())
    }
}

/// Remembers every record it accepts
#[derive(Default)]
pub struct RecordingTarget {
    records: Mutex<Vec<(String, PathBuf, LogRecord)>>,
}

impl RecordingTarget {
    pub fn records(&self) -> Vec<(String, PathBuf, LogRecord)> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl TargetHandler for RecordingTarget {
    fn kind(&self) -> &'static str {
        "recording"
    }

    async fn append_log(&self, target_id: &str, file: &Path, record: &LogRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .push((target_id.to_string(), file.to_path_buf(), record.clone()));
        Ok(())
    }
}

pub struct RejectingTarget;

#[async_trait]
impl TargetHandler for RejectingTarget {
    fn kind(&self) -> &'static str {
        "rejecting"
    }

    async fn append_log(&self, target_id: &str, _file: &Path, _record: &LogRecord) -> anyhow::Result<()> {
        bail!("{} is unavailable", target_id)
    }
}

/// Completes only once every target sharing the barrier has been invoked
pub struct BarrierTarget {
    barrier: Arc<Barrier>,
}

impl BarrierTarget {
    pub fn new(barrier: Arc<Barrier>) -> Self {
        Self { barrier }
    }
}

#[async_trait]
impl TargetHandler for BarrierTarget {
    fn kind(&self) -> &'static str {
        "barrier"
    }

    async fn append_log(&self, _target_id: &str, _file: &Path, _record: &LogRecord) -> anyhow::Result<()> {
        self.barrier.wait().await;
        Ok(())
    }
}

/// Forwards tailed lines to a channel and counts errors
pub struct ChannelListener {
    lines: mpsc::UnboundedSender<(PathBuf, String, u64)>,
    errors: AtomicUsize,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(PathBuf, String, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Arc::new(Self {
            lines: tx,
            errors: AtomicUsize::new(0),
        });
        (listener, rx)
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TailListener for ChannelListener {
    async fn on_line(&self, file: &Path, line: String, position: u64) {
        let _ = self.lines.send((file.to_path_buf(), line, position));
    }

    fn on_error(&self, _file: &Path, _error: &TailError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}
