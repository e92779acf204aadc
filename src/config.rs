//! Agent configuration
//!
//! Loaded from a TOML file given with `--config`; without one the agent runs
//! the built-in configuration that tails every container log on the node.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use kubeship_logs::{DEFAULT_POLL_INTERVAL, DEFAULT_REFRESH_INTERVAL};
use kubeship_sink::{
    DEFAULT_ENDPOINT, DEFAULT_FLUSH_MARGIN, DEFAULT_HIGH_WATER_MARK, DEFAULT_IDLE_EXPIRY,
    DEFAULT_WRITE_DELAY, SinkSettings,
};
use kubeship_types::{DEFAULT_POSITION_SUFFIX, PositionPolicy};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub sources: Vec<SourceSettings>,
}

impl AgentConfig {
    /// Read and parse a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        for source in &config.sources {
            if source.targets.is_empty() {
                tracing::warn!(source = %source.name, "source has no targets, its lines are dropped");
            }
        }
        Ok(config)
    }
}

impl Default for AgentConfig {
    /// Tail every container log on the node and ship it to cloud logging
    fn default() -> Self {
        Self {
            sources: vec![SourceSettings {
                name: "k8s_containers".to_string(),
                base_dir: PathBuf::from("/var/log/containers"),
                path: default_path(),
                handler: SourceKind::K8sContainer,
                refresh_interval_ms: default_refresh_interval_ms(),
                poll_interval_ms: default_poll_interval_ms(),
                position: PositionSettings {
                    save: false,
                    interval_ms: 1000,
                    suffix: DEFAULT_POSITION_SUFFIX.to_string(),
                },
                addons: Map::new(),
                targets: BTreeMap::from([(
                    "stackdriver".to_string(),
                    TargetSettings::CloudLogging(CloudLoggingSettings::default()),
                )]),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    K8sContainer,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSettings {
    pub name: String,
    pub base_dir: PathBuf,
    #[serde(default = "default_path")]
    pub path: String,
    pub handler: SourceKind,
    /// `0` turns periodic reconciliation off
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub position: PositionSettings,
    #[serde(default)]
    pub addons: Map<String, Value>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetSettings>,
}

impl SourceSettings {
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_ms > 0).then(|| Duration::from_millis(self.refresh_interval_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PositionSettings {
    #[serde(default)]
    pub save: bool,
    #[serde(default = "default_position_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_position_suffix")]
    pub suffix: String,
}

impl Default for PositionSettings {
    fn default() -> Self {
        Self {
            save: false,
            interval_ms: default_position_interval_ms(),
            suffix: default_position_suffix(),
        }
    }
}

impl From<&PositionSettings> for PositionPolicy {
    fn from(settings: &PositionSettings) -> Self {
        PositionPolicy {
            save: settings.save,
            interval: Duration::from_millis(settings.interval_ms),
            suffix: settings.suffix.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetSettings {
    CloudLogging(CloudLoggingSettings),
    Console,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudLoggingSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Static bearer token; wins over the metadata server
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_true")]
    pub use_metadata_server: bool,
    /// Print entries to stdout instead of sending them
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_write_delay_ms")]
    pub write_delay_ms: u64,
    #[serde(default = "default_flush_margin_ms")]
    pub flush_margin_ms: u64,
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
    #[serde(default = "default_idle_expiry_ms")]
    pub idle_expiry_ms: u64,
}

impl CloudLoggingSettings {
    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            high_water_mark: self.high_water_mark,
            write_delay: Duration::from_millis(self.write_delay_ms),
            flush_margin: Duration::from_millis(self.flush_margin_ms),
            idle_expiry: Duration::from_millis(self.idle_expiry_ms),
        }
    }
}

impl Default for CloudLoggingSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: None,
            use_metadata_server: true,
            dry_run: false,
            write_delay_ms: default_write_delay_ms(),
            flush_margin_ms: default_flush_margin_ms(),
            high_water_mark: default_high_water_mark(),
            idle_expiry_ms: default_idle_expiry_ms(),
        }
    }
}

fn default_path() -> String {
    "*.log".to_string()
}

fn default_refresh_interval_ms() -> u64 {
    DEFAULT_REFRESH_INTERVAL.as_millis() as u64
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_position_interval_ms() -> u64 {
    PositionPolicy::default().interval.as_millis() as u64
}

fn default_position_suffix() -> String {
    DEFAULT_POSITION_SUFFIX.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_write_delay_ms() -> u64 {
    DEFAULT_WRITE_DELAY.as_millis() as u64
}

fn default_flush_margin_ms() -> u64 {
    DEFAULT_FLUSH_MARGIN.as_millis() as u64
}

fn default_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}

fn default_idle_expiry_ms() -> u64 {
    DEFAULT_IDLE_EXPIRY.as_millis() as u64
}
