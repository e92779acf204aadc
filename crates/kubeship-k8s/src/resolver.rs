//! Cached pod lookups and owner-chain resolution
//!
//! Every single object fetch is cached, so a busy pod costs one API call per
//! hour. The walk up the owner chain is not cached as a whole: it is a loop
//! over cached steps, bounded by a visited set and a maximum depth so a
//! cyclic or very deep chain still terminates.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kubeship_logs::TtlCache;
use tracing::{debug, warn};

use crate::error::LookupError;
use crate::metadata::{MetadataLookup, OwnerKind, OwnerRef, PodMeta, ResourceMeta};

/// How long fetched pods and owners are reused
pub const DEFAULT_LOOKUP_TTL: Duration = Duration::from_secs(3600);

/// Owner references followed before giving up on finding the top
pub const MAX_OWNER_DEPTH: usize = 8;

type PodResult = Result<Option<Arc<PodMeta>>, LookupError>;
type OwnerResult = Result<Option<Arc<ResourceMeta>>, LookupError>;

/// Resolves pods and their top-most owner through a shared cache
#[derive(Clone)]
pub struct MetadataResolver {
    lookup: Arc<dyn MetadataLookup>,
    ttl: Duration,
    pods: TtlCache<PodResult>,
    owners: TtlCache<OwnerResult>,
}

impl MetadataResolver {
    pub fn new(lookup: Arc<dyn MetadataLookup>) -> Self {
        Self::with_ttl(lookup, DEFAULT_LOOKUP_TTL)
    }

    pub fn with_ttl(lookup: Arc<dyn MetadataLookup>, ttl: Duration) -> Self {
        Self {
            lookup,
            ttl,
            pods: TtlCache::new(),
            owners: TtlCache::new(),
        }
    }

    /// The pod `namespace/name`, or `None` if it no longer exists
    pub async fn pod(&self, namespace: &str, name: &str) -> PodResult {
        let key = format!("pod:{}/{}", namespace, name);
        let lookup = Arc::clone(&self.lookup);
        let (namespace, name) = (namespace.to_string(), name.to_string());

        self.pods
            .get_or_compute(&key, self.ttl, move || async move {
                let pod = lookup.get_pod(&namespace, &name).await?;
                Ok::<_, LookupError>(pod.map(Arc::new))
            })
            .await
    }

    /// Follow owner references from `owner` to the top-most known owner
    ///
    /// The walk stops at an object without owner, an unknown kind, a missing
    /// object, a repeated object or after [`MAX_OWNER_DEPTH`] steps; the last
    /// object fetched is returned. `None` means not even `owner` resolved.
    pub async fn top_owner(&self, namespace: &str, owner: Option<&OwnerRef>) -> OwnerResult {
        let mut visited = HashSet::new();
        let mut top: Option<Arc<ResourceMeta>> = None;
        let mut namespace = namespace.to_string();
        let mut next = owner.cloned();

        while let Some(owner_ref) = next.take() {
            let Some(kind) = OwnerKind::from_kind(&owner_ref.kind) else {
                warn!(kind = %owner_ref.kind, name = %owner_ref.name, "unknown owner kind");
                break;
            };

            let key = format!("owner:{}/{}/{}", namespace, kind, owner_ref.name);
            if visited.len() >= MAX_OWNER_DEPTH {
                warn!(owner = %key, depth = MAX_OWNER_DEPTH, "owner chain too deep, stopping");
                break;
            }
            if !visited.insert(key.clone()) {
                warn!(owner = %key, "owner chain is cyclic, stopping");
                break;
            }

            let Some(resource) = self.owner(&key, &namespace, kind, &owner_ref.name).await? else {
                debug!(owner = %key, "owner not found");
                break;
            };

            next = resource.owner.clone();
            namespace = resource.namespace.clone();
            top = Some(resource);
        }

        Ok(top)
    }

    async fn owner(&self, key: &str, namespace: &str, kind: OwnerKind, name: &str) -> OwnerResult {
        let lookup = Arc::clone(&self.lookup);
        let (namespace, name) = (namespace.to_string(), name.to_string());

        self.owners
            .get_or_compute(key, self.ttl, move || async move {
                let owner = lookup.get_owner(&namespace, kind, &name).await?;
                Ok::<_, LookupError>(owner.map(Arc::new))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeCluster;

    #[tokio::test]
    async fn test_resolves_deployment_through_replicaset() {
        let cluster = FakeCluster::default()
            .with_owner(OwnerKind::ReplicaSet, "web-5d8f", Some(("Deployment", "web")))
            .with_owner(OwnerKind::Deployment, "web", None);
        let resolver = MetadataResolver::new(Arc::new(cluster));

        let top = resolver
            .top_owner("default", Some(&OwnerRef::new("ReplicaSet", "web-5d8f")))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(top.kind, OwnerKind::Deployment);
        assert_eq!(top.name, "web");
    }

    #[tokio::test]
    async fn test_cyclic_owners_terminate() {
        let cluster = Arc::new(
            FakeCluster::default()
                .with_owner(OwnerKind::ReplicaSet, "a", Some(("ReplicaSet", "b")))
                .with_owner(OwnerKind::ReplicaSet, "b", Some(("ReplicaSet", "a"))),
        );
        let resolver = MetadataResolver::new(cluster.clone());

        let top = resolver
            .top_owner("default", Some(&OwnerRef::new("ReplicaSet", "a")))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(top.name, "b");
        assert_eq!(cluster.owner_calls(), 2);
    }

    #[tokio::test]
    async fn test_deep_chain_stops_at_depth_bound() {
        let mut cluster = FakeCluster::default();
        for i in 0..20 {
            let parent = format!("rs-{}", i + 1);
            cluster = cluster.with_owner(
                OwnerKind::ReplicaSet,
                &format!("rs-{}", i),
                Some(("ReplicaSet", parent.as_str())),
            );
        }
        let cluster = Arc::new(cluster);
        let resolver = MetadataResolver::new(cluster.clone());

        let top = resolver
            .top_owner("default", Some(&OwnerRef::new("ReplicaSet", "rs-0")))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(cluster.owner_calls(), MAX_OWNER_DEPTH);
        assert_eq!(top.name, format!("rs-{}", MAX_OWNER_DEPTH - 1));
    }

    #[tokio::test]
    async fn test_unknown_kind_keeps_last_owner() {
        let cluster = FakeCluster::default().with_owner(
            OwnerKind::ReplicaSet,
            "web-5d8f",
            Some(("Rollout", "web")),
        );
        let resolver = MetadataResolver::new(Arc::new(cluster));

        let top = resolver
            .top_owner("default", Some(&OwnerRef::new("ReplicaSet", "web-5d8f")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(top.kind, OwnerKind::ReplicaSet);

        let none = resolver
            .top_owner("default", Some(&OwnerRef::new("Node", "n1")))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pod_lookups_are_cached() {
        let cluster = Arc::new(FakeCluster::default().with_pod("default", "web-1", None));
        let resolver = MetadataResolver::with_ttl(cluster.clone(), Duration::from_secs(60));

        let first = resolver.pod("default", "web-1").await.unwrap().unwrap();
        let second = resolver.pod("default", "web-1").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cluster.pod_calls(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        resolver.pod("default", "web-1").await.unwrap();
        assert_eq!(cluster.pod_calls(), 2);

        assert!(resolver.pod("default", "gone").await.unwrap().is_none());
    }
}
