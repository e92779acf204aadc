//! Kubernetes objects as seen by the enrichment path

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::error::LookupError;

/// First owner reference of an object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

impl OwnerRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// The parts of a pod used for enrichment
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodMeta {
    pub name: String,
    pub namespace: String,
    pub owner: Option<OwnerRef>,
    /// Container name to image, from the container statuses
    pub images: HashMap<String, String>,
}

/// An owning workload (ReplicaSet, Deployment, ...)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceMeta {
    pub kind: OwnerKind,
    pub name: String,
    pub namespace: String,
    pub owner: Option<OwnerRef>,
}

/// Owner kinds the resolver knows how to fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    ReplicaSet,
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    Service,
}

impl OwnerKind {
    /// Parse an owner reference kind (case-insensitive)
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "replicaset" => Some(Self::ReplicaSet),
            "deployment" => Some(Self::Deployment),
            "statefulset" => Some(Self::StatefulSet),
            "daemonset" => Some(Self::DaemonSet),
            "job" => Some(Self::Job),
            "cronjob" => Some(Self::CronJob),
            "service" => Some(Self::Service),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReplicaSet => "ReplicaSet",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
            Self::Service => "Service",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read access to the Kubernetes objects needed for enrichment
///
/// Objects that do not exist resolve to `Ok(None)`.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodMeta>, LookupError>;

    async fn get_owner(
        &self,
        namespace: &str,
        kind: OwnerKind,
        name: &str,
    ) -> Result<Option<ResourceMeta>, LookupError>;
}

/// Components of a kubelet container log file name
///
/// `<pod>_<namespace>_<container>-<container id>.log`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileNameParts {
    pub pod_name: String,
    pub namespace: String,
    pub container_name: String,
    pub docker_id: String,
}

impl FileNameParts {
    pub fn from_path(file: &Path) -> Result<Self, LookupError> {
        let invalid = || LookupError::InvalidFileName(file.display().to_string());

        let name = file.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
        let stem = name.strip_suffix(".log").unwrap_or(name);

        let mut parts = stem.splitn(3, '_');
        let (Some(pod_name), Some(namespace), Some(container)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let (container_name, docker_id) = container.rsplit_once('-').ok_or_else(invalid)?;

        if pod_name.is_empty() || namespace.is_empty() || container_name.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            pod_name: pod_name.to_string(),
            namespace: namespace.to_string(),
            container_name: container_name.to_string(),
            docker_id: docker_id.to_string(),
        })
    }
}
