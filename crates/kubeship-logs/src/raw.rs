//! Source handler for plain log files without Kubernetes context

use std::path::Path;

use async_trait::async_trait;
use kubeship_types::{LogRecord, RecordBody};

use crate::handler::SourceHandler;
use crate::parser::LineParser;

/// Wraps each line as a `raw` record with a guessed severity
#[derive(Clone, Copy, Debug, Default)]
pub struct RawSource;

#[async_trait]
impl SourceHandler for RawSource {
    fn kind(&self) -> &'static str {
        "raw"
    }

    async fn read_line(&self, file: &Path, line: &str, position: u64) -> anyhow::Result<LogRecord> {
        let body = RecordBody::Raw {
            file: file.display().to_string(),
            position,
            log: LineParser::parse_text(line),
        };
        Ok(LogRecord::from_body(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeship_types::LogFields;
    use serde_json::json;

    #[tokio::test]
    async fn test_raw_record_shape() {
        let record = RawSource
            .read_line(Path::new("/var/log/app.log"), "[ERROR] oops", 7)
            .await
            .unwrap();

        assert_eq!(
            record.into_value(),
            json!({
                "type": "raw",
                "file": "/var/log/app.log",
                "position": 7,
                "log": {"log": "[ERROR] oops", "severity": "ERROR"}
            })
        );
    }

    #[tokio::test]
    async fn test_json_lines_are_not_interpreted() {
        let record = RawSource
            .read_line(Path::new("/tmp/a.log"), r#"{"level":"warn"}"#, 1)
            .await
            .unwrap();

        match record.body().unwrap() {
            RecordBody::Raw { log, .. } => assert_eq!(log, LogFields::text(r#"{"level":"warn"}"#)),
            other => panic!("unexpected body {:?}", other),
        }
    }
}
