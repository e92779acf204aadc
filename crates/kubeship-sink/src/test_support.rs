use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::buffer::{LogWriter, SinkEntry};

/// Writer that remembers every batch, or fails every write
pub struct RecordingWriter<M = u32> {
    batches: Mutex<Vec<(String, Vec<SinkEntry<M>>)>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl<M> Default for RecordingWriter<M> {
    fn default() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail: false,
        }
    }
}

impl<M: Clone> RecordingWriter<M> {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<(String, Vec<SinkEntry<M>>)> {
        self.batches.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<M: Send + Sync + 'static> LogWriter for RecordingWriter<M> {
    type Metadata = M;

    async fn write(&self, destination: &str, entries: Vec<SinkEntry<M>>) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("backend unavailable");
        }
        self.batches.lock().push((destination.to_string(), entries));
        Ok(())
    }
}
