//! Kubernetes metadata for kubeship
//!
//! This crate resolves the pod and owning workload behind a container log
//! file and provides the `k8s_container` source handler.

mod client;
mod error;
mod metadata;
mod resolver;
mod source;

#[cfg(test)]
mod test_support;

pub use client::KubeClient;
pub use error::LookupError;
pub use metadata::{FileNameParts, MetadataLookup, OwnerKind, OwnerRef, PodMeta, ResourceMeta};
pub use resolver::{DEFAULT_LOOKUP_TTL, MAX_OWNER_DEPTH, MetadataResolver};
pub use source::K8sContainerSource;

// Re-export types used in our public API
pub use kubeship_types::KubernetesInfo;
