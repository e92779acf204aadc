use std::io::Write;
use std::path::Path;

use anyhow::bail;
use async_trait::async_trait;
use kubeship_logs::TargetHandler;
use kubeship_types::{LogRecord, RecordBody};
use serde::Serialize;

use crate::buffer::{BufferedSink, LogWriter};
use crate::entry::{EntryMetadata, GkeEnvironment, file_destination};

/// Ships records to cloud logging through a buffered sink
///
/// Container lines go to a log named after their top-most owner; plain file
/// lines to a log named after the file.
pub struct CloudLoggingTarget<W: LogWriter<Metadata = EntryMetadata>> {
    env: GkeEnvironment,
    sink: BufferedSink<W>,
}

impl<W: LogWriter<Metadata = EntryMetadata>> CloudLoggingTarget<W> {
    pub fn new(env: GkeEnvironment, sink: BufferedSink<W>) -> Self {
        Self { env, sink }
    }

    pub fn sink(&self) -> &BufferedSink<W> {
        &self.sink
    }

    /// Write out everything still buffered
    pub async fn flush_all(&self) {
        self.sink.flush_all().await;
    }
}

#[async_trait]
impl<W: LogWriter<Metadata = EntryMetadata>> TargetHandler for CloudLoggingTarget<W> {
    fn kind(&self) -> &'static str {
        "cloud_logging"
    }

    async fn append_log(&self, _target_id: &str, _file: &Path, record: &LogRecord) -> anyhow::Result<()> {
        match record.record_type() {
            Some("k8s_container") | Some("raw") => {}
            other => bail!("unsupported record type: {}", other.unwrap_or("<none>")),
        }

        let (destination, metadata, payload) = match record.body()? {
            RecordBody::K8sContainer { kubernetes, log } => (
                kubernetes.resource_name.clone(),
                EntryMetadata::for_container(&self.env, &kubernetes, &log),
                log.log.unwrap_or_default(),
            ),
            RecordBody::Raw { file, log, .. } => (
                file_destination(&file),
                EntryMetadata::for_file(&self.env, &file, &log),
                log.log.unwrap_or_default(),
            ),
        };

        self.sink.append(&destination, metadata, payload).await;
        Ok(())
    }
}

#[derive(Serialize)]
struct ConsoleLine<'a> {
    target: &'a str,
    file: String,
    record: &'a LogRecord,
}

/// Prints every record as a JSON line on stdout
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleTarget;

#[async_trait]
impl TargetHandler for ConsoleTarget {
    fn kind(&self) -> &'static str {
        "console"
    }

    async fn append_log(&self, target_id: &str, file: &Path, record: &LogRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(&ConsoleLine {
            target: target_id,
            file: file.display().to_string(),
            record,
        })?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", line)?;
        Ok(())
    }
}
