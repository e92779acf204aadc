//! Enrichment and fan-out of tailed lines
//!
//! ```text
//!   raw line ──> SourceHandler::read_line ──> + addons ──┬──> target A
//!                                                       ├──> target B
//!                                                       └──> target C
//! ```
//!
//! Every target is invoked before any of them is awaited, and one target's
//! failure never affects the others.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::TailError;
use crate::handler::{SourceHandler, TargetHandler};
use crate::tailer::TailListener;

/// What happened to one line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineOutcome {
    /// The source handler failed; no target saw the line
    Dropped,
    /// Every target settled
    Dispatched { delivered: usize, failed: usize },
}

/// The per-source enrichment and dispatch chain shared by its tailers
pub struct Pipeline {
    source_name: String,
    handler: Arc<dyn SourceHandler>,
    targets: BTreeMap<String, Arc<dyn TargetHandler>>,
    addons: Map<String, Value>,
}

impl Pipeline {
    pub fn new(
        source_name: impl Into<String>,
        handler: Arc<dyn SourceHandler>,
        targets: BTreeMap<String, Arc<dyn TargetHandler>>,
        addons: Map<String, Value>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            handler,
            targets,
            addons,
        }
    }

    /// Enrich one line and hand the record to every target
    pub async fn handle_line(&self, file: &Path, line: &str, position: u64) -> LineOutcome {
        let mut record = match self.handler.read_line(file, line, position).await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    source = %self.source_name,
                    handler = self.handler.kind(),
                    path = %file.display(),
                    position,
                    "failed to enrich line, dropping it: {:#}",
                    e
                );
                return LineOutcome::Dropped;
            }
        };

        if !self.addons.is_empty() {
            record.extend(&self.addons);
        }

        let record = &record;
        let deliveries = self.targets.iter().map(|(id, target)| async move {
            (id, target.append_log(id, file, record).await)
        });

        let mut delivered = 0;
        let mut failed = 0;
        for (id, result) in join_all(deliveries).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    warn!(
                        source = %self.source_name,
                        target = %id,
                        path = %file.display(),
                        position,
                        "target rejected record: {:#}",
                        e
                    );
                }
            }
        }

        LineOutcome::Dispatched { delivered, failed }
    }

    /// Report a tail-level error without disturbing the source
    pub fn handle_error_from_file(&self, file: &Path, error: &TailError) {
        warn!(source = %self.source_name, path = %file.display(), "tail error: {}", error);
    }
}

#[async_trait]
impl TailListener for Pipeline {
    async fn on_line(&self, file: &Path, line: String, position: u64) {
        let outcome = self.handle_line(file, &line, position).await;
        debug!(path = %file.display(), position, ?outcome, "line handled");
    }

    fn on_error(&self, file: &Path, error: &TailError) {
        self.handle_error_from_file(file, error);
    }
}
