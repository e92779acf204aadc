//! In-memory cluster for the enrichment tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::LookupError;
use crate::metadata::{MetadataLookup, OwnerKind, OwnerRef, PodMeta, ResourceMeta};

/// Pods and owners in the `default` namespace unless stated otherwise
#[derive(Default)]
pub struct FakeCluster {
    pods: HashMap<(String, String), PodMeta>,
    owners: HashMap<(OwnerKind, String), ResourceMeta>,
    pod_calls: AtomicUsize,
    owner_calls: AtomicUsize,
}

impl FakeCluster {
    pub fn with_pod(mut self, namespace: &str, name: &str, owner: Option<(&str, &str)>) -> Self {
        self.pods.insert(
            (namespace.to_string(), name.to_string()),
            PodMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                owner: owner.map(|(kind, name)| OwnerRef::new(kind, name)),
                images: HashMap::new(),
            },
        );
        self
    }

    pub fn with_image(mut self, pod: &str, container: &str, image: &str) -> Self {
        if let Some(meta) = self.pods.values_mut().find(|meta| meta.name == pod) {
            meta.images.insert(container.to_string(), image.to_string());
        }
        self
    }

    pub fn with_owner(mut self, kind: OwnerKind, name: &str, owner: Option<(&str, &str)>) -> Self {
        self.owners.insert(
            (kind, name.to_string()),
            ResourceMeta {
                kind,
                name: name.to_string(),
                namespace: "default".to_string(),
                owner: owner.map(|(kind, name)| OwnerRef::new(kind, name)),
            },
        );
        self
    }

    pub fn pod_calls(&self) -> usize {
        self.pod_calls.load(Ordering::SeqCst)
    }

    pub fn owner_calls(&self) -> usize {
        self.owner_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataLookup for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodMeta>, LookupError> {
        self.pod_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_owner(
        &self,
        _namespace: &str,
        kind: OwnerKind,
        name: &str,
    ) -> Result<Option<ResourceMeta>, LookupError> {
        self.owner_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.owners.get(&(kind, name.to_string())).cloned())
    }
}
