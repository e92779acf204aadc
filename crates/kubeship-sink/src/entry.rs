//! Cloud Logging entries built from kubeship records

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use kubeship_types::{KubernetesInfo, LogFields, Severity};
use serde::Serialize;

/// Node and cluster identity stamped on every entry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GkeEnvironment {
    pub project_id: Option<String>,
    pub cluster_name: Option<String>,
    pub zone: Option<String>,
    pub vm_id: Option<String>,
}

/// The monitored resource an entry is attached to
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub labels: BTreeMap<String, String>,
}

/// Everything about an entry except its text
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub severity: String,
    pub labels: BTreeMap<String, String>,
    pub timestamp: String,
    pub resource: MonitoredResource,
}

impl EntryMetadata {
    /// Metadata for a container line, labelled the way GKE labels its own logs
    pub fn for_container(
        env: &GkeEnvironment,
        kubernetes: &KubernetesInfo,
        log: &LogFields,
    ) -> Self {
        let mut labels = BTreeMap::new();
        insert_some(&mut labels, "compute.googleapis.com/resource_name", &env.vm_id);
        labels.insert(
            "container.googleapis.com/namespace_name".to_string(),
            kubernetes.namespace.clone(),
        );
        labels.insert(
            "container.googleapis.com/pod_name".to_string(),
            kubernetes.pod_name.clone(),
        );
        labels.insert(
            "container.googleapis.com/stream".to_string(),
            log.stream.clone().unwrap_or_else(|| "stdout".to_string()),
        );

        let mut resource_labels = BTreeMap::new();
        insert_some(&mut resource_labels, "cluster_name", &env.cluster_name);
        resource_labels.insert("container_name".to_string(), kubernetes.resource_name.clone());
        resource_labels.insert("instance_id".to_string(), kubernetes.docker_id.clone());
        resource_labels.insert("namespace_id".to_string(), kubernetes.namespace.clone());
        resource_labels.insert("pod_id".to_string(), kubernetes.pod_name.clone());
        insert_some(&mut resource_labels, "project_id", &env.project_id);
        insert_some(&mut resource_labels, "zone", &env.zone);

        Self {
            severity: severity_of(log),
            labels,
            timestamp: timestamp_of(log),
            resource: MonitoredResource {
                kind: "container".to_string(),
                labels: resource_labels,
            },
        }
    }

    /// Metadata for a line of a plain file
    pub fn for_file(env: &GkeEnvironment, file: &str, log: &LogFields) -> Self {
        let mut labels = BTreeMap::new();
        insert_some(&mut labels, "compute.googleapis.com/resource_name", &env.vm_id);
        labels.insert("file".to_string(), file.to_string());

        let mut resource_labels = BTreeMap::new();
        insert_some(&mut resource_labels, "project_id", &env.project_id);

        Self {
            severity: severity_of(log),
            labels,
            timestamp: timestamp_of(log),
            resource: MonitoredResource {
                kind: "global".to_string(),
                labels: resource_labels,
            },
        }
    }
}

/// Log name used for lines of a plain file: its name without extension
pub fn file_destination(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}

/// A severity Cloud Logging accepts; unknown names become `DEFAULT`
fn severity_of(log: &LogFields) -> String {
    log.severity
        .as_deref()
        .and_then(Severity::from_tag)
        .unwrap_or_default()
        .as_str()
        .to_string()
}

/// The runtime's timestamp when it is RFC 3339, otherwise now
fn timestamp_of(log: &LogFields) -> String {
    log.timestamp()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn insert_some(labels: &mut BTreeMap<String, String>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        labels.insert(key.to_string(), value.clone());
    }
}
