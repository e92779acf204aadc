//! Per-destination write buffering
//!
//! ```text
//!   append ──> pending > high water mark? ──yes──> flush now
//!                   │ no
//!                   v
//!              quiet for write_delay - flush_margin? ──yes──> flush now
//!                   │ no
//!                   v
//!              arm a write_delay timer (once)
//! ```
//!
//! A flush swaps the pending entries out under the lock and hands them to the
//! writer. Failed batches are logged and dropped. A sweep removes buffers that
//! have been empty and unflushed for longer than the idle expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pending entries that trigger an immediate flush once exceeded
pub const DEFAULT_HIGH_WATER_MARK: usize = 50;

/// Delay of the deferred flush
pub const DEFAULT_WRITE_DELAY: Duration = Duration::from_secs(60);

/// A buffer unflushed for `write_delay - flush_margin` flushes on the next append
pub const DEFAULT_FLUSH_MARGIN: Duration = Duration::from_secs(10);

/// Idle buffers are dropped after this long; also the sweep period
pub const DEFAULT_IDLE_EXPIRY: Duration = Duration::from_secs(120);

/// One buffered write
#[derive(Clone, Debug, PartialEq)]
pub struct SinkEntry<M> {
    pub metadata: M,
    pub payload: String,
}

/// Delivers a batch of entries to one destination
#[async_trait]
pub trait LogWriter: Send + Sync + 'static {
    type Metadata: Send + Sync + 'static;

    async fn write(
        &self,
        destination: &str,
        entries: Vec<SinkEntry<Self::Metadata>>,
    ) -> anyhow::Result<()>;
}

/// Flush triggers of a [`BufferedSink`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkSettings {
    pub high_water_mark: usize,
    pub write_delay: Duration,
    pub flush_margin: Duration,
    pub idle_expiry: Duration,
}

impl SinkSettings {
    fn flush_after(&self) -> Duration {
        self.write_delay.saturating_sub(self.flush_margin)
    }
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            write_delay: DEFAULT_WRITE_DELAY,
            flush_margin: DEFAULT_FLUSH_MARGIN,
            idle_expiry: DEFAULT_IDLE_EXPIRY,
        }
    }
}

struct SinkBuffer<M> {
    pending: Vec<SinkEntry<M>>,
    last_flush: Instant,
    timer_armed: bool,
    /// Tells a buffer apart from one that replaced it after an idle sweep
    generation: u64,
}

impl<M> SinkBuffer<M> {
    fn new(now: Instant, generation: u64) -> Self {
        Self {
            pending: Vec::new(),
            last_flush: now,
            timer_armed: false,
            generation,
        }
    }
}

/// What an append decided
enum Trigger {
    FlushNow,
    /// Deferred flush for the buffer of this generation
    ArmTimer(u64),
    None,
}

struct SinkInner<W: LogWriter> {
    writer: W,
    settings: SinkSettings,
    buffers: Mutex<HashMap<String, SinkBuffer<W::Metadata>>>,
    next_generation: AtomicU64,
    cancel: CancellationToken,
}

/// Batches entries per destination before handing them to a [`LogWriter`]
pub struct BufferedSink<W: LogWriter> {
    inner: Arc<SinkInner<W>>,
}

impl<W: LogWriter> BufferedSink<W> {
    /// Create the sink and start its idle sweep (requires a tokio runtime)
    pub fn new(writer: W, settings: SinkSettings) -> Self {
        let inner = Arc::new(SinkInner {
            writer,
            settings,
            buffers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });

        let period = inner.settings.idle_expiry.max(Duration::from_millis(1));
        tokio::spawn(sweep_idle(
            Arc::downgrade(&inner),
            Instant::now() + period,
            period,
            inner.cancel.clone(),
        ));

        Self { inner }
    }

    pub fn settings(&self) -> &SinkSettings {
        &self.inner.settings
    }

    pub fn writer(&self) -> &W {
        &self.inner.writer
    }

    /// Queue one entry for `destination` and flush or schedule a flush
    pub async fn append(&self, destination: &str, metadata: W::Metadata, payload: String) {
        let trigger = {
            let now = Instant::now();
            let settings = &self.inner.settings;
            let mut buffers = self.inner.buffers.lock();
            let buffer = buffers.entry(destination.to_string()).or_insert_with(|| {
                SinkBuffer::new(now, self.inner.next_generation.fetch_add(1, Ordering::Relaxed))
            });
            buffer.pending.push(SinkEntry { metadata, payload });

            if buffer.pending.len() > settings.high_water_mark
                || now.duration_since(buffer.last_flush) > settings.flush_after()
            {
                Trigger::FlushNow
            } else if !buffer.timer_armed {
                buffer.timer_armed = true;
                Trigger::ArmTimer(buffer.generation)
            } else {
                Trigger::None
            }
        };

        match trigger {
            Trigger::FlushNow => self.inner.flush(destination).await,
            Trigger::ArmTimer(generation) => {
                let deadline = Instant::now() + self.inner.settings.write_delay;
                tokio::spawn(deferred_flush(
                    Arc::clone(&self.inner),
                    destination.to_string(),
                    generation,
                    deadline,
                ));
            }
            Trigger::None => {}
        }
    }

    /// Write out everything pending for `destination`
    pub async fn flush(&self, destination: &str) {
        self.inner.flush(destination).await;
    }

    /// Write out every buffer, concurrently
    pub async fn flush_all(&self) {
        let destinations = self.destinations();
        join_all(
            destinations
                .iter()
                .map(|destination| self.inner.flush(destination)),
        )
        .await;
    }

    /// Destinations that currently have a buffer
    pub fn destinations(&self) -> Vec<String> {
        let mut destinations: Vec<String> = self.inner.buffers.lock().keys().cloned().collect();
        destinations.sort();
        destinations
    }

    /// Entries waiting for `destination`
    pub fn pending(&self, destination: &str) -> usize {
        self.inner
            .buffers
            .lock()
            .get(destination)
            .map_or(0, |buffer| buffer.pending.len())
    }
}

impl<W: LogWriter> Drop for BufferedSink<W> {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl<W: LogWriter> SinkInner<W> {
    async fn flush(&self, destination: &str) {
        let batch = {
            let mut buffers = self.buffers.lock();
            let Some(buffer) = buffers.get_mut(destination) else {
                return;
            };
            if buffer.pending.is_empty() {
                return;
            }
            buffer.last_flush = Instant::now();
            std::mem::take(&mut buffer.pending)
        };

        let count = batch.len();
        match self.writer.write(destination, batch).await {
            Ok(()) => debug!(destination, count, "flushed entries"),
            Err(e) => warn!(destination, count, "failed to flush entries: {:#}", e),
        }
    }

    fn sweep(&self) {
        let now = Instant::now();
        let idle_expiry = self.settings.idle_expiry;
        self.buffers.lock().retain(|destination, buffer| {
            let keep =
                !buffer.pending.is_empty() || now.duration_since(buffer.last_flush) <= idle_expiry;
            if !keep {
                debug!(destination = %destination, "dropping idle buffer");
            }
            keep
        });
    }
}

async fn deferred_flush<W: LogWriter>(
    inner: Arc<SinkInner<W>>,
    destination: String,
    generation: u64,
    deadline: Instant,
) {
    tokio::select! {
        _ = inner.cancel.cancelled() => return,
        _ = tokio::time::sleep_until(deadline) => {}
    }

    {
        let mut buffers = inner.buffers.lock();
        match buffers.get_mut(&destination) {
            Some(buffer) if buffer.generation == generation => buffer.timer_armed = false,
            // Swept and recreated since; the new buffer runs its own timer
            _ => return,
        }
    }
    inner.flush(&destination).await;
}

async fn sweep_idle<W: LogWriter>(
    inner: Weak<SinkInner<W>>,
    start: Instant,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.sweep();
            }
        }
    }
}
