//! Resumable tailing of a single log file
//!
//! A tailer counts every line it reads. With position saving enabled the file
//! is replayed from the top and lines up to the checkpointed count are
//! skipped; the count reached so far is written back to the checkpoint file on
//! a fixed interval. Without it the tailer only follows lines appended after
//! it started and never touches the disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kubeship_types::PositionPolicy;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TailError;
use crate::follow::{FileFollower, StartAt};
use crate::position::CheckpointFile;

/// Shortest checkpoint interval accepted; a zero period cannot drive a ticker
const MIN_CHECKPOINT_INTERVAL: Duration = Duration::from_millis(10);

/// Shortest poll interval accepted; zero would spin on the file
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Receives the lines and errors of a tailer
#[async_trait]
pub trait TailListener: Send + Sync {
    /// Called for each new line, in file order; the next line waits for this call
    async fn on_line(&self, file: &Path, line: String, position: u64);

    fn on_error(&self, file: &Path, error: &TailError);
}

/// Lifecycle of a tailer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TailerState {
    Stopped,
    Starting,
    Tailing,
}

/// Line counters of one tailed file
#[derive(Debug, Default)]
pub struct TailState {
    /// Lines read since the tailer started (including replayed ones)
    current: AtomicU64,

    /// Highest line handed to the listener (or restored from the checkpoint)
    persisted: AtomicU64,

    /// Value most recently written to the checkpoint file
    last_saved: AtomicU64,
}

impl TailState {
    fn restored(position: u64) -> Self {
        Self {
            current: AtomicU64::new(0),
            persisted: AtomicU64::new(position),
            last_saved: AtomicU64::new(position),
        }
    }

    pub fn current_position(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn persisted_position(&self) -> u64 {
        self.persisted.load(Ordering::SeqCst)
    }

    pub fn last_saved_position(&self) -> u64 {
        self.last_saved.load(Ordering::SeqCst)
    }

    /// Count one line; returns its position unless it was already delivered
    fn advance(&self) -> Option<u64> {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        if current <= self.persisted.load(Ordering::SeqCst) {
            return None;
        }
        self.persisted.store(current, Ordering::SeqCst);
        Some(current)
    }
}

/// A running tailer for one file
pub struct SourceTail {
    file: PathBuf,
    poll_interval: Duration,
    state: Arc<TailState>,
    status: Arc<Mutex<TailerState>>,
    cancel: CancellationToken,
    checkpoint_task: Option<JoinHandle<()>>,
}

impl SourceTail {
    /// Open `file` and start delivering its lines to `listener`
    ///
    /// Returns the open error if the file cannot be followed; nothing is
    /// spawned in that case.
    pub async fn start(
        file: impl Into<PathBuf>,
        policy: &PositionPolicy,
        poll_interval: Duration,
        listener: Arc<dyn TailListener>,
    ) -> Result<Self, TailError> {
        let file = file.into();
        let status = Arc::new(Mutex::new(TailerState::Starting));

        let (state, checkpoint, start_at) = if policy.save {
            let checkpoint = CheckpointFile::for_log(&file, policy);
            let position = checkpoint.read().await;
            debug!(path = %file.display(), position, "restored checkpoint");
            (TailState::restored(position), Some(checkpoint), StartAt::Beginning)
        } else {
            (TailState::default(), None, StartAt::End)
        };
        let state = Arc::new(state);

        let follower = match FileFollower::open(&file, start_at).await {
            Ok(follower) => follower,
            Err(e) => {
                *status.lock() = TailerState::Stopped;
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);

        tokio::spawn(follow(
            follower,
            Arc::clone(&state),
            listener,
            poll_interval,
            cancel.clone(),
        ));

        let checkpoint_task = checkpoint.map(|checkpoint| {
            tokio::spawn(save_periodically(
                checkpoint,
                file.clone(),
                Arc::clone(&state),
                policy.interval.max(MIN_CHECKPOINT_INTERVAL),
                cancel.clone(),
            ))
        });

        *status.lock() = TailerState::Tailing;

        Ok(Self {
            file,
            poll_interval,
            state,
            status,
            cancel,
            checkpoint_task,
        })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Effective poll interval, after clamping
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn state(&self) -> Arc<TailState> {
        Arc::clone(&self.state)
    }

    pub fn status(&self) -> TailerState {
        *self.status.lock()
    }

    /// Stop reading and checkpointing
    ///
    /// A listener call already in progress runs to completion. Waits for the
    /// final checkpoint write, if any.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        *self.status.lock() = TailerState::Stopped;

        if let Some(task) = self.checkpoint_task.take() {
            if let Err(e) = task.await {
                warn!(path = %self.file.display(), "checkpoint task failed: {}", e);
            }
        }
    }
}

impl Drop for SourceTail {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn follow(
    mut follower: FileFollower,
    state: Arc<TailState>,
    listener: Arc<dyn TailListener>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let path = follower.path().to_path_buf();
    // Errors are reported once until the next successful poll
    let mut failing = false;

    loop {
        match follower.poll().await {
            Ok(lines) => {
                failing = false;
                for line in lines {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if let Some(position) = state.advance() {
                        listener.on_line(&path, line, position).await;
                    }
                }
            }
            Err(e) => {
                if !failing {
                    listener.on_error(&path, &e);
                    failing = true;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    debug!(path = %path.display(), lines = state.current_position(), "tail stopped");
}

async fn save_periodically(
    checkpoint: CheckpointFile,
    file: PathBuf,
    state: Arc<TailState>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => save_if_changed(&checkpoint, &state).await,
        }
    }

    // No sidecar is left behind for a file that is gone
    if tokio::fs::try_exists(&file).await.unwrap_or(false) {
        save_if_changed(&checkpoint, &state).await;
    }
}

async fn save_if_changed(checkpoint: &CheckpointFile, state: &TailState) {
    let position = state.persisted_position();
    if position == state.last_saved_position() {
        return;
    }

    match checkpoint.write(position).await {
        Ok(()) => {
            state.last_saved.store(position, Ordering::SeqCst);
            debug!(path = %checkpoint.path().display(), position, "checkpoint saved");
        }
        Err(e) => warn!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ChannelListener;
    use std::io::Write;

    const POLL: Duration = Duration::from_millis(10);

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    async fn wait_for_file(path: &Path, expected: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if std::fs::read_to_string(path).ok().as_deref() == Some(expected) {
                    return;
                }
                tokio::time::sleep(POLL).await;
            }
        })
        .await
        .expect("checkpoint never reached expected value");
    }

    #[tokio::test]
    async fn test_resumes_after_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        let text: String = (1..=45).map(|i| format!("line {}\n", i)).collect();
        append(&log, &text);
        std::fs::write(dir.path().join("app.log.position"), "42").unwrap();

        let (listener, mut lines) = ChannelListener::new();
        let policy = PositionPolicy::saving(Duration::from_millis(20));
        let mut tail = SourceTail::start(&log, &policy, POLL, listener)
            .await
            .unwrap();
        assert_eq!(tail.status(), TailerState::Tailing);

        for expected in 43..=45 {
            let (_, line, position) = lines.recv().await.unwrap();
            assert_eq!(position, expected);
            assert_eq!(line, format!("line {}", expected));
        }

        wait_for_file(&dir.path().join("app.log.position"), "45").await;
        assert_eq!(tail.state().last_saved_position(), 45);

        tail.stop().await;
        assert_eq!(tail.status(), TailerState::Stopped);
    }

    #[tokio::test]
    async fn test_follow_only_starts_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "old\n");

        let (listener, mut lines) = ChannelListener::new();
        let mut tail = SourceTail::start(&log, &PositionPolicy::follow_only(), POLL, listener)
            .await
            .unwrap();

        append(&log, "a\nb\n");
        let (file, line, position) = lines.recv().await.unwrap();
        assert_eq!((file, line.as_str(), position), (log.clone(), "a", 1));
        let (_, line, position) = lines.recv().await.unwrap();
        assert_eq!((line.as_str(), position), ("b", 2));

        tail.stop().await;
        assert!(!dir.path().join("app.log.position").exists());
    }

    #[tokio::test]
    async fn test_zero_poll_interval_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "");

        let (listener, mut lines) = ChannelListener::new();
        let mut tail =
            SourceTail::start(&log, &PositionPolicy::follow_only(), Duration::ZERO, listener)
                .await
                .unwrap();
        assert_eq!(tail.poll_interval(), MIN_POLL_INTERVAL);

        append(&log, "a\n");
        let (_, line, position) = lines.recv().await.unwrap();
        assert_eq!((line.as_str(), position), ("a", 1));

        tail.stop().await;
    }

    #[tokio::test]
    async fn test_stop_writes_final_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "one\ntwo\n");

        let (listener, mut lines) = ChannelListener::new();
        let policy = PositionPolicy::saving(Duration::from_secs(3600));
        let mut tail = SourceTail::start(&log, &policy, POLL, listener)
            .await
            .unwrap();

        lines.recv().await.unwrap();
        lines.recv().await.unwrap();
        tail.stop().await;

        assert_eq!(
            std::fs::read_to_string(dir.path().join("app.log.position")).unwrap(),
            "2"
        );
    }

    #[tokio::test]
    async fn test_stop_after_delete_leaves_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "one\n");

        let (listener, mut lines) = ChannelListener::new();
        let policy = PositionPolicy::saving(Duration::from_secs(3600));
        let mut tail = SourceTail::start(&log, &policy, POLL, listener)
            .await
            .unwrap();

        lines.recv().await.unwrap();
        std::fs::remove_file(&log).unwrap();
        tail.stop().await;

        assert!(!dir.path().join("app.log.position").exists());
    }

    #[tokio::test]
    async fn test_missing_file_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let (listener, _lines) = ChannelListener::new();
        let result = SourceTail::start(
            dir.path().join("missing.log"),
            &PositionPolicy::follow_only(),
            POLL,
            listener,
        )
        .await;
        assert!(matches!(result, Err(TailError::Open { .. })));
    }

    #[tokio::test]
    async fn test_read_errors_reach_listener_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "");

        let (listener, _lines) = ChannelListener::new();
        let errors = listener.clone();
        let mut tail = SourceTail::start(&log, &PositionPolicy::follow_only(), POLL, listener)
            .await
            .unwrap();

        std::fs::remove_file(&log).unwrap();
        tokio::time::sleep(POLL * 10).await;
        tail.stop().await;

        assert_eq!(errors.error_count(), 1);
    }

    #[test]
    fn test_advance_skips_replayed_lines() {
        let state = TailState::restored(2);
        assert_eq!(state.advance(), None);
        assert_eq!(state.advance(), None);
        assert_eq!(state.advance(), Some(3));
        assert_eq!(state.current_position(), 3);
        assert_eq!(state.persisted_position(), 3);
        assert_eq!(state.last_saved_position(), 2);
    }
}
