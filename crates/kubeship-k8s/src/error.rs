use std::sync::Arc;

/// Errors raised while resolving Kubernetes metadata for a log file
///
/// Cheap to clone so a failed lookup can be shared through the lookup cache.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LookupError {
    #[error("kubernetes API request failed: {0}")]
    Api(#[source] Arc<kube::Error>),

    #[error("not a container log file name: {0}")]
    InvalidFileName(String),
}

impl From<kube::Error> for LookupError {
    fn from(error: kube::Error) -> Self {
        Self::Api(Arc::new(error))
    }
}
