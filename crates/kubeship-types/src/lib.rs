//! Shared types for kubeship
//!
//! This crate contains data structures used across multiple kubeship crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Source Types
// ============================================================================

/// Suffix appended to a log file path to name its checkpoint file
pub const DEFAULT_POSITION_SUFFIX: &str = ".position";

/// Checkpoint interval used when a source does not configure one
pub const DEFAULT_POSITION_INTERVAL: Duration = Duration::from_millis(5000);

/// Position-tracking policy of a source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionPolicy {
    /// Persist positions and replay files from the top on start
    pub save: bool,

    /// How often the checkpoint file is written
    pub interval: Duration,

    /// Appended to the log file path to name the checkpoint file
    pub suffix: String,
}

impl PositionPolicy {
    /// Policy that only follows new lines and never touches the disk
    pub fn follow_only() -> Self {
        Self {
            save: false,
            ..Self::default()
        }
    }

    /// Policy that persists positions every `interval`
    pub fn saving(interval: Duration) -> Self {
        Self {
            save: true,
            interval,
            ..Self::default()
        }
    }

    /// Path of the checkpoint file that belongs to `file`
    pub fn checkpoint_path(&self, file: &Path) -> PathBuf {
        let mut name = OsString::from(file.as_os_str());
        name.push(&self.suffix);
        PathBuf::from(name)
    }
}

impl Default for PositionPolicy {
    fn default() -> Self {
        Self {
            save: false,
            interval: DEFAULT_POSITION_INTERVAL,
            suffix: DEFAULT_POSITION_SUFFIX.to_string(),
        }
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Cloud logging severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Default,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Severity {
    /// Map a bracketed level tag such as `WARN` or `err` to a severity
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "NOTICE" => Some(Self::Notice),
            "WARN" | "WARNING" => Some(Self::Warning),
            "ERR" | "ERROR" => Some(Self::Error),
            "CRITICAL" | "FATAL" => Some(Self::Critical),
            "ALERT" => Some(Self::Alert),
            "EMERGENCY" => Some(Self::Emergency),
            "TRACE" | "DEFAULT" => Some(Self::Default),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Notice => "NOTICE",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
            Self::Alert => "ALERT",
            Self::Emergency => "EMERGENCY",
        }
    }
}

/// The parsed content of one log line
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogFields {
    /// Message text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,

    /// Output stream (`stdout` / `stderr`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,

    /// Timestamp as written by the container runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,

    /// Severity name, either from the line itself or guessed from the text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,

    /// Any other structured fields of a JSON line
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogFields {
    /// Fields for a plain text line
    pub fn text(line: impl Into<String>) -> Self {
        Self {
            log: Some(line.into()),
            ..Self::default()
        }
    }

    /// Parsed `time` field (if it is RFC 3339)
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let time = self.time.as_deref()?;
        DateTime::parse_from_rfc3339(time)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// Kubernetes identity of the container that wrote a line
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesInfo {
    pub docker_id: String,
    pub image: Option<String>,
    pub pod_name: String,
    pub container_name: String,
    pub namespace: String,
    pub resource_kind: String,
    pub resource_name: String,
}

/// Typed view of the records produced by the built-in source handlers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RecordBody {
    #[serde(rename = "k8s_container")]
    K8sContainer {
        kubernetes: KubernetesInfo,
        log: LogFields,
    },
    #[serde(rename = "raw")]
    Raw {
        file: String,
        position: u64,
        log: LogFields,
    },
}

/// A structured record flowing from a source handler to the targets
///
/// The engine treats it as an opaque JSON object; only addon fields are
/// merged into it before dispatch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogRecord(Map<String, Value>);

impl LogRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a typed record body
    pub fn from_body(body: &RecordBody) -> serde_json::Result<Self> {
        match serde_json::to_value(body)? {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(serde::de::Error::custom("record body is not an object")),
        }
    }

    /// Typed view of the record (fails for unknown `type` values)
    pub fn body(&self) -> serde_json::Result<RecordBody> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    /// The `type` discriminator, if any
    pub fn record_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Shallow-merge `fields` into the record, overwriting existing keys
    pub fn extend(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for LogRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
