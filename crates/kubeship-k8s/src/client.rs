use std::fmt::Debug;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::LookupError;
use crate::metadata::{MetadataLookup, OwnerKind, OwnerRef, PodMeta, ResourceMeta};

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
}

impl KubeClient {
    /// Connect with the in-cluster service account, or the local kubeconfig
    pub async fn new() -> Result<Self> {
        let client = kube::Client::try_default()
            .await
            .context("Failed to create Kubernetes client. Is the agent running in a cluster?")?;
        Ok(Self { client })
    }

    pub fn from_client(client: kube::Client) -> Self {
        Self { client }
    }

    async fn get_meta<K>(&self, namespace: &str, name: &str) -> Result<Option<ObjectMeta>, LookupError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let object = api.get_opt(name).await?;
        Ok(object.map(|object| object.meta().clone()))
    }
}

#[async_trait]
impl MetadataLookup for KubeClient {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodMeta>, LookupError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let Some(pod) = pods.get_opt(name).await? else {
            debug!(namespace, pod = name, "pod not found");
            return Ok(None);
        };

        let images = pod
            .status
            .and_then(|status| status.container_statuses)
            .unwrap_or_default()
            .into_iter()
            .map(|status| (status.name, status.image))
            .collect();

        Ok(Some(PodMeta {
            name: pod.metadata.name.clone().unwrap_or_else(|| name.to_string()),
            namespace: pod
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| namespace.to_string()),
            owner: first_owner(&pod.metadata),
            images,
        }))
    }

    async fn get_owner(
        &self,
        namespace: &str,
        kind: OwnerKind,
        name: &str,
    ) -> Result<Option<ResourceMeta>, LookupError> {
        let meta = match kind {
            OwnerKind::ReplicaSet => self.get_meta::<ReplicaSet>(namespace, name).await?,
            OwnerKind::Deployment => self.get_meta::<Deployment>(namespace, name).await?,
            OwnerKind::StatefulSet => self.get_meta::<StatefulSet>(namespace, name).await?,
            OwnerKind::DaemonSet => self.get_meta::<DaemonSet>(namespace, name).await?,
            OwnerKind::Job => self.get_meta::<Job>(namespace, name).await?,
            OwnerKind::CronJob => self.get_meta::<CronJob>(namespace, name).await?,
            OwnerKind::Service => self.get_meta::<Service>(namespace, name).await?,
        };

        Ok(meta.map(|meta| ResourceMeta {
            kind,
            name: meta.name.clone().unwrap_or_else(|| name.to_string()),
            namespace: meta
                .namespace
                .clone()
                .unwrap_or_else(|| namespace.to_string()),
            owner: first_owner(&meta),
        }))
    }
}

/// Only the first owner reference is followed
fn first_owner(meta: &ObjectMeta) -> Option<OwnerRef> {
    meta.owner_references
        .as_ref()?
        .first()
        .map(|owner| OwnerRef::new(owner.kind.clone(), owner.name.clone()))
}
