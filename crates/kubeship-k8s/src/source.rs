use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use kubeship_logs::{LineParser, SourceHandler};
use kubeship_types::{KubernetesInfo, LogRecord, RecordBody};

use crate::metadata::{FileNameParts, MetadataLookup};
use crate::resolver::MetadataResolver;

/// Source handler for kubelet container logs (`/var/log/containers`)
///
/// Resolves the pod named in the file name and its top-most owner, so lines
/// are attributed to the Deployment, StatefulSet, ... that runs them.
#[derive(Clone)]
pub struct K8sContainerSource {
    resolver: MetadataResolver,
}

impl K8sContainerSource {
    pub fn new(lookup: Arc<dyn MetadataLookup>) -> Self {
        Self::with_resolver(MetadataResolver::new(lookup))
    }

    pub fn with_resolver(resolver: MetadataResolver) -> Self {
        Self { resolver }
    }

    async fn kubernetes_info(&self, parts: FileNameParts) -> anyhow::Result<KubernetesInfo> {
        let pod = self
            .resolver
            .pod(&parts.namespace, &parts.pod_name)
            .await
            .with_context(|| format!("Failed to get pod {}/{}", parts.namespace, parts.pod_name))?;

        let owner = match pod.as_deref() {
            Some(pod) => self
                .resolver
                .top_owner(&pod.namespace, pod.owner.as_ref())
                .await
                .with_context(|| format!("Failed to resolve owner of pod {}", pod.name))?,
            None => None,
        };

        let image = pod
            .as_deref()
            .and_then(|pod| pod.images.get(&parts.container_name).cloned());
        let pod_name = pod
            .as_deref()
            .map(|pod| pod.name.clone())
            .unwrap_or_else(|| parts.pod_name.clone());
        let (resource_kind, resource_name) = match owner {
            Some(owner) => (owner.kind.as_str().to_string(), owner.name.clone()),
            None => ("Pod".to_string(), pod_name),
        };

        Ok(KubernetesInfo {
            docker_id: parts.docker_id,
            image,
            pod_name: parts.pod_name,
            container_name: parts.container_name,
            namespace: parts.namespace,
            resource_kind,
            resource_name,
        })
    }
}

#[async_trait]
impl SourceHandler for K8sContainerSource {
    fn kind(&self) -> &'static str {
        "k8s_container"
    }

    async fn read_line(&self, file: &Path, line: &str, _position: u64) -> anyhow::Result<LogRecord> {
        let parts = FileNameParts::from_path(file)?;
        let log = LineParser::parse(line);
        let kubernetes = self.kubernetes_info(parts).await?;

        Ok(LogRecord::from_body(&RecordBody::K8sContainer { kubernetes, log })?)
    }
}
