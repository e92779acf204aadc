//! Log writers behind the buffered sink

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::buffer::{LogWriter, SinkEntry};
use crate::entry::EntryMetadata;
use crate::token::TokenSource;

/// Cloud Logging v2 `entries:write`
pub const DEFAULT_ENDPOINT: &str = "https://logging.googleapis.com/v2/entries:write";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest response body quoted in an error
const MAX_ERROR_BODY: usize = 512;

/// Build the HTTP client shared by writers and the token source
pub fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// Posts batches to a Cloud Logging compatible `entries:write` endpoint
#[derive(Debug, Clone)]
pub struct HttpLogWriter {
    client: reqwest::Client,
    endpoint: String,
    project_id: Option<String>,
    token: TokenSource,
}

impl HttpLogWriter {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        project_id: Option<String>,
        token: TokenSource,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            project_id,
            token,
        }
    }

    /// Full log name of `destination`
    pub fn log_name(&self, destination: &str) -> String {
        let log_id = destination.replace('/', "%2F");
        match &self.project_id {
            Some(project) => format!("projects/{}/logs/{}", project, log_id),
            None => log_id,
        }
    }

    fn request_body(&self, destination: &str, entries: Vec<SinkEntry<EntryMetadata>>) -> Value {
        let entries: Vec<Value> = entries.into_iter().map(entry_json).collect();
        json!({
            "logName": self.log_name(destination),
            "entries": entries,
        })
    }
}

#[async_trait]
impl LogWriter for HttpLogWriter {
    type Metadata = EntryMetadata;

    async fn write(
        &self,
        destination: &str,
        entries: Vec<SinkEntry<EntryMetadata>>,
    ) -> anyhow::Result<()> {
        let body = self.request_body(destination, entries);

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = self.token.token().await? {
            request = request.bearer_auth(token.as_str());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send entries for {}", destination))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(MAX_ERROR_BODY).collect();
            bail!("{} rejected entries for {}: {}", status, destination, excerpt);
        }

        Ok(())
    }
}

#[derive(Serialize)]
struct StdoutLine<'a> {
    destination: &'a str,
    #[serde(flatten)]
    entry: Value,
}

/// Prints each entry as one JSON line on stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutWriter;

#[async_trait]
impl LogWriter for StdoutWriter {
    type Metadata = EntryMetadata;

    async fn write(
        &self,
        destination: &str,
        entries: Vec<SinkEntry<EntryMetadata>>,
    ) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        for entry in entries {
            let line = StdoutLine {
                destination,
                entry: entry_json(entry),
            };
            serde_json::to_writer(&mut out, &line)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }
}

/// One `LogEntry` of the write request
fn entry_json(entry: SinkEntry<EntryMetadata>) -> Value {
    let SinkEntry { metadata, payload } = entry;
    json!({
        "severity": metadata.severity,
        "labels": metadata.labels,
        "timestamp": metadata.timestamp,
        "resource": metadata.resource,
        "textPayload": payload,
    })
}
