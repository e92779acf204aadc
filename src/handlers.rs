//! Builds the runtime sources and handlers described by the configuration

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use kubeship_k8s::{K8sContainerSource, KubeClient, MetadataLookup};
use kubeship_logs::{RawSource, SourceConfig, SourceHandler, TargetHandler};
use kubeship_sink::{
    BufferedSink, CloudLoggingTarget, ConsoleTarget, GkeEnvironment, HttpLogWriter, StdoutWriter,
    TokenSource, http_client,
};
use kubeship_types::PositionPolicy;
use tracing::info;

use crate::config::{AgentConfig, CloudLoggingSettings, SourceKind, SourceSettings, TargetSettings};

/// A cloud logging target kept around so it can be drained on shutdown
enum CloudTarget {
    Http(Arc<CloudLoggingTarget<HttpLogWriter>>),
    Stdout(Arc<CloudLoggingTarget<StdoutWriter>>),
}

impl CloudTarget {
    async fn flush_all(&self) {
        match self {
            Self::Http(target) => target.flush_all().await,
            Self::Stdout(target) => target.flush_all().await,
        }
    }
}

/// Turns configuration into [`SourceConfig`]s
///
/// Handlers are shared: every `k8s_container` source uses the same metadata
/// caches, and the Kubernetes client is only created when one is configured.
pub struct HandlerRegistry {
    env: GkeEnvironment,
    http: Option<reqwest::Client>,
    containers: Option<Arc<K8sContainerSource>>,
    cloud_targets: Vec<CloudTarget>,
}

impl HandlerRegistry {
    pub fn new(env: GkeEnvironment) -> Self {
        Self {
            env,
            http: None,
            containers: None,
            cloud_targets: Vec::new(),
        }
    }

    /// Build every configured source
    pub async fn build(&mut self, config: &AgentConfig) -> Result<Vec<SourceConfig>> {
        let mut sources = Vec::with_capacity(config.sources.len());
        for settings in &config.sources {
            let source = self
                .source_config(settings)
                .await
                .with_context(|| format!("Failed to set up source {}", settings.name))?;
            sources.push(source);
        }
        Ok(sources)
    }

    /// Write out everything still buffered by cloud logging targets
    pub async fn flush_all(&self) {
        join_all(self.cloud_targets.iter().map(CloudTarget::flush_all)).await;
    }

    async fn source_config(&mut self, settings: &SourceSettings) -> Result<SourceConfig> {
        let handler = self.source_handler(settings.handler).await?;

        let mut source = SourceConfig::new(
            settings.name.clone(),
            settings.base_dir.clone(),
            settings.path.clone(),
            handler,
        );
        source.position = PositionPolicy::from(&settings.position);
        source.addons = settings.addons.clone();
        source.refresh_interval = settings.refresh_interval();
        source.poll_interval = settings.poll_interval();

        for (id, target) in &settings.targets {
            let handler = self
                .target_handler(target)
                .with_context(|| format!("Failed to set up target {}", id))?;
            source = source.with_target(id.clone(), handler);
        }

        info!(
            source = %settings.name,
            base_dir = %settings.base_dir.display(),
            path = %settings.path,
            targets = settings.targets.len(),
            "configured source"
        );
        Ok(source)
    }

    async fn source_handler(&mut self, kind: SourceKind) -> Result<Arc<dyn SourceHandler>> {
        match kind {
            SourceKind::Raw => Ok(Arc::new(RawSource)),
            SourceKind::K8sContainer => {
                if let Some(containers) = &self.containers {
                    return Ok(containers.clone());
                }
                let client = KubeClient::new().await?;
                let lookup: Arc<dyn MetadataLookup> = Arc::new(client);
                let containers = Arc::new(K8sContainerSource::new(lookup));
                self.containers = Some(containers.clone());
                Ok(containers)
            }
        }
    }

    fn target_handler(&mut self, settings: &TargetSettings) -> Result<Arc<dyn TargetHandler>> {
        match settings {
            TargetSettings::Console => Ok(Arc::new(ConsoleTarget)),
            TargetSettings::CloudLogging(settings) => self.cloud_logging(settings),
        }
    }

    fn cloud_logging(&mut self, settings: &CloudLoggingSettings) -> Result<Arc<dyn TargetHandler>> {
        if settings.dry_run {
            let target = Arc::new(CloudLoggingTarget::new(
                self.env.clone(),
                BufferedSink::new(StdoutWriter, settings.sink_settings()),
            ));
            self.cloud_targets.push(CloudTarget::Stdout(target.clone()));
            return Ok(target);
        }

        let client = self.http_client()?;
        let token = match &settings.token {
            Some(token) => TokenSource::Static(token.clone()),
            None if settings.use_metadata_server => TokenSource::metadata_server(client.clone()),
            None => TokenSource::None,
        };
        let writer = HttpLogWriter::new(
            client,
            settings.endpoint.clone(),
            self.env.project_id.clone(),
            token,
        );

        let target = Arc::new(CloudLoggingTarget::new(
            self.env.clone(),
            BufferedSink::new(writer, settings.sink_settings()),
        ));
        self.cloud_targets.push(CloudTarget::Http(target.clone()));
        Ok(target)
    }

    fn http_client(&mut self) -> Result<reqwest::Client> {
        if let Some(client) = &self.http {
            return Ok(client.clone());
        }
        let client = http_client()?;
        self.http = Some(client.clone());
        Ok(client)
    }
}

/// Target ids of every configured source, for the startup summary
pub fn target_summary(config: &AgentConfig) -> BTreeMap<String, Vec<String>> {
    config
        .sources
        .iter()
        .map(|source| (source.name.clone(), source.targets.keys().cloned().collect()))
        .collect()
}
