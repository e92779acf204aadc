//! Directory-level discovery of log files and reconciliation of their tailers

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kubeship_types::PositionPolicy;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handler::{SourceHandler, TargetHandler};
use crate::pipeline::Pipeline;
use crate::tailer::{SourceTail, TailState};

/// Reconciliation cadence used when the watch misses an event
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// How often a tailer checks its file for new data
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A configured source: which files to tail and where their lines go
#[derive(Clone)]
pub struct SourceConfig {
    pub name: String,
    pub base_dir: PathBuf,
    /// Glob matched against file names under `base_dir`
    pub path: String,
    pub position: PositionPolicy,
    /// Fields merged into every record before dispatch
    pub addons: Map<String, Value>,
    pub handler: Arc<dyn SourceHandler>,
    pub targets: BTreeMap<String, Arc<dyn TargetHandler>>,
    /// Periodic reconciliation on top of the filesystem watch (`None` disables it)
    pub refresh_interval: Option<Duration>,
    pub poll_interval: Duration,
}

impl SourceConfig {
    pub fn new(
        name: impl Into<String>,
        base_dir: impl Into<PathBuf>,
        path: impl Into<String>,
        handler: Arc<dyn SourceHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            base_dir: base_dir.into(),
            path: path.into(),
            position: PositionPolicy::default(),
            addons: Map::new(),
            handler,
            targets: BTreeMap::new(),
            refresh_interval: Some(DEFAULT_REFRESH_INTERVAL),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_target(mut self, id: impl Into<String>, target: Arc<dyn TargetHandler>) -> Self {
        self.targets.insert(id.into(), target);
        self
    }

    /// Full glob pattern, with `base_dir` escaped
    fn pattern(&self) -> String {
        let base = glob::Pattern::escape(&self.base_dir.to_string_lossy());
        Path::new(&base).join(&self.path).to_string_lossy().into_owned()
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("name", &self.name)
            .field("base_dir", &self.base_dir)
            .field("path", &self.path)
            .field("position", &self.position)
            .field("handler", &self.handler.kind())
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct SourceInner {
    name: String,
    base_dir: PathBuf,
    pattern: String,
    position: PositionPolicy,
    poll_interval: Duration,
    pipeline: Arc<Pipeline>,

    /// Live tailers keyed by file; the lock also serializes refreshes
    tails: Mutex<HashMap<PathBuf, SourceTail>>,
}

/// Keeps one tailer running for every file matching the source's glob
pub struct Source {
    inner: Arc<SourceInner>,
    refresh_interval: Option<Duration>,
    cancel: CancellationToken,
    watcher: Option<RecommendedWatcher>,
    observer: Option<JoinHandle<()>>,
}

impl Source {
    pub fn new(config: SourceConfig) -> Self {
        let pattern = config.pattern();
        let pipeline = Pipeline::new(
            config.name.clone(),
            config.handler,
            config.targets,
            config.addons,
        );

        Self {
            inner: Arc::new(SourceInner {
                name: config.name,
                base_dir: config.base_dir,
                pattern,
                position: config.position,
                poll_interval: config.poll_interval,
                pipeline: Arc::new(pipeline),
                tails: Mutex::new(HashMap::new()),
            }),
            refresh_interval: config.refresh_interval,
            cancel: CancellationToken::new(),
            watcher: None,
            observer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Watch the base directory and tail every matching file
    pub async fn start(&mut self) {
        if self.observer.is_some() {
            return;
        }
        self.cancel = CancellationToken::new();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.watcher = match watch_dir(&self.inner.base_dir, events_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(
                    source = %self.inner.name,
                    path = %self.inner.base_dir.display(),
                    "failed to watch directory, relying on periodic refresh: {}",
                    e
                );
                None
            }
        };

        self.observer = Some(tokio::spawn(observe(
            Arc::clone(&self.inner),
            events_rx,
            self.refresh_interval,
            self.cancel.clone(),
        )));

        info!(source = %self.inner.name, pattern = %self.inner.pattern, "source started");
        self.inner.refresh().await;
    }

    /// Stop watching and stop every tailer
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.watcher = None;

        if let Some(observer) = self.observer.take() {
            if let Err(e) = observer.await {
                warn!(source = %self.inner.name, "observer task failed: {}", e);
            }
        }

        let mut tails = self.inner.tails.lock().await;
        for (_, mut tail) in tails.drain() {
            tail.stop().await;
        }
        info!(source = %self.inner.name, "source stopped");
    }

    /// Reconcile the running tailers with the files currently on disk
    pub async fn refresh(&self) {
        self.inner.refresh().await;
    }

    /// Files currently being tailed, sorted
    pub async fn active_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.inner.tails.lock().await.keys().cloned().collect();
        files.sort();
        files
    }

    /// Line counters of the tailer for `file`, if it is tailed
    pub async fn tail_state(&self, file: &Path) -> Option<Arc<TailState>> {
        self.inner.tails.lock().await.get(file).map(SourceTail::state)
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SourceInner {
    async fn refresh(&self) {
        let mut tails = self.tails.lock().await;

        let Some(matched) = self.list_files().await else {
            return;
        };

        let gone: Vec<PathBuf> = tails
            .keys()
            .filter(|path| !matched.contains(*path))
            .cloned()
            .collect();
        for path in gone {
            if let Some(mut tail) = tails.remove(&path) {
                info!(source = %self.name, path = %path.display(), "file removed, stopping tail");
                tail.stop().await;
            }
        }

        for path in matched {
            if tails.contains_key(&path) {
                continue;
            }

            let listener = Arc::clone(&self.pipeline);
            match SourceTail::start(&path, &self.position, self.poll_interval, listener).await {
                Ok(tail) => {
                    info!(source = %self.name, path = %path.display(), "tailing file");
                    tails.insert(path, tail);
                }
                // Left untailed; the next refresh tries again
                Err(e) => self.pipeline.handle_error_from_file(&path, &e),
            }
        }
    }

    async fn list_files(&self) -> Option<BTreeSet<PathBuf>> {
        let pattern = self.pattern.clone();
        let listing = tokio::task::spawn_blocking(move || -> Result<BTreeSet<PathBuf>, glob::PatternError> {
            let mut files = BTreeSet::new();
            for entry in glob::glob(&pattern)? {
                match entry {
                    Ok(path) if !path.is_dir() => {
                        files.insert(path);
                    }
                    Ok(_) => {}
                    Err(e) => debug!("skipping unreadable entry: {}", e),
                }
            }
            Ok(files)
        })
        .await;

        match listing {
            Ok(Ok(files)) => Some(files),
            Ok(Err(e)) => {
                warn!(source = %self.name, pattern = %self.pattern, "invalid file pattern: {}", e);
                None
            }
            Err(e) => {
                warn!(source = %self.name, "file listing failed: {}", e);
                None
            }
        }
    }
}

/// Any reported change, errors included, asks for a re-listing
fn watch_dir(dir: &Path, events: mpsc::UnboundedSender<()>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        if let Err(e) = result {
            warn!("watch error: {}", e);
        }
        let _ = events.send(());
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

async fn observe(
    source: Arc<SourceInner>,
    mut events: mpsc::UnboundedReceiver<()>,
    refresh_interval: Option<Duration>,
    cancel: CancellationToken,
) {
    let mut ticker = refresh_interval.map(|period| {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            Some(()) = events.recv() => {
                // Coalesce a burst of events into one refresh
                while events.try_recv().is_ok() {}
                debug!(source = %source.name, "directory changed");
                source.refresh().await;
            }

            _ = async {
                match ticker.as_mut() {
                    Some(ticker) => ticker.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                source.refresh().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EchoSource, RecordingTarget};
    use serde_json::json;

    fn config(dir: &Path, recorder: Arc<RecordingTarget>) -> SourceConfig {
        let mut config = SourceConfig::new("containers", dir, "*.log", Arc::new(EchoSource))
            .with_target("recorder", recorder);
        config.position = PositionPolicy::follow_only();
        config.poll_interval = Duration::from_millis(10);
        config.refresh_interval = None;
        config
    }

    #[tokio::test]
    async fn test_refresh_reconciles_tailers() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = (
            dir.path().join("a.log"),
            dir.path().join("b.log"),
            dir.path().join("c.log"),
        );
        std::fs::write(&a, "").unwrap();
        std::fs::write(&b, "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let source = Source::new(config(dir.path(), Arc::default()));
        source.refresh().await;
        assert_eq!(source.active_files().await, vec![a.clone(), b.clone()]);
        let b_state = source.tail_state(&b).await.unwrap();

        std::fs::remove_file(&a).unwrap();
        std::fs::write(&c, "").unwrap();
        source.refresh().await;

        assert_eq!(source.active_files().await, vec![b.clone(), c]);
        assert!(Arc::ptr_eq(&b_state, &source.tail_state(&b).await.unwrap()));
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        std::fs::write(&a, "").unwrap();

        let source = Source::new(config(dir.path(), Arc::default()));
        source.refresh().await;
        let first = source.tail_state(&a).await.unwrap();
        source.refresh().await;

        assert_eq!(source.active_files().await, vec![a.clone()]);
        assert!(Arc::ptr_eq(&first, &source.tail_state(&a).await.unwrap()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unopenable_file_is_retried_on_next_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("dangling.log");
        let target = dir.path().join("target.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let source = Source::new(config(dir.path(), Arc::default()));
        source.refresh().await;
        assert!(source.active_files().await.is_empty());

        std::fs::write(&target, "").unwrap();
        source.refresh().await;
        assert_eq!(source.active_files().await, vec![link]);
    }

    #[tokio::test]
    async fn test_started_source_ships_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(RecordingTarget::default());
        let mut config = config(dir.path(), recorder.clone());
        config.refresh_interval = Some(Duration::from_millis(50));

        let mut source = Source::new(config);
        source.start().await;

        let log = dir.path().join("web.log");
        std::fs::write(&log, "").unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while source.tail_state(&log).await.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            std::fs::write(&log, "hello\n").unwrap();
            while recorder.records().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("line was never shipped");

        source.stop().await;
        assert!(source.active_files().await.is_empty());

        let (target, file, record) = &recorder.records()[0];
        assert_eq!(target, "recorder");
        assert_eq!(file, &log);
        assert_eq!(record.get("line"), Some(&json!("hello")));
        assert_eq!(record.get("position"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_start_one_tail_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        std::fs::write(&a, "").unwrap();
        std::fs::write(&b, "").unwrap();

        let recorder = Arc::new(RecordingTarget::default());
        let source = Source::new(config(dir.path(), recorder.clone()));
        futures::join!(source.refresh(), source.refresh(), source.refresh());
        assert_eq!(source.active_files().await, vec![a.clone(), b]);

        std::fs::write(&a, "once\n").unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while recorder.records().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("line was never shipped");

        // A duplicate tailer would deliver the line a second time
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.records().len(), 1);
    }

    #[tokio::test]
    async fn test_directory_change_triggers_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = Source::new(config(dir.path(), Arc::default()));
        source.start().await;
        assert!(source.active_files().await.is_empty());

        let log = dir.path().join("new.log");
        std::fs::write(&log, "").unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while source.active_files().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("watch never picked up the new file");
        assert_eq!(source.active_files().await, vec![log.clone()]);

        std::fs::remove_file(&log).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !source.active_files().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("watch never noticed the removal");

        source.stop().await;
    }

    #[test]
    fn test_pattern_escapes_base_dir() {
        let config = SourceConfig::new("s", "/var/log/[pods]", "*.log", Arc::new(EchoSource));
        assert_eq!(config.pattern(), "/var/log/[[]pods[]]/*.log");
    }
}
