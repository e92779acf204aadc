use std::path::Path;

use async_trait::async_trait;
use kubeship_types::LogRecord;

/// Turns a raw line from a tailed file into a structured record
#[async_trait]
pub trait SourceHandler: Send + Sync {
    /// Short name used in diagnostics
    fn kind(&self) -> &'static str;

    /// Build the record for `line`, the `position`-th line of `file`
    ///
    /// An error drops the line: it is logged and never dispatched.
    async fn read_line(&self, file: &Path, line: &str, position: u64) -> anyhow::Result<LogRecord>;
}

/// Accepts structured records for delivery to one destination
#[async_trait]
pub trait TargetHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Accept `record` read from `file` on behalf of the target named `target_id`
    async fn append_log(&self, target_id: &str, file: &Path, record: &LogRecord)
        -> anyhow::Result<()>;
}
