use crate::container_engine::EngineError;
use crate::error::ErrorKind;
use crate::kube_client::KubeClientError;
use crate::poll::PollTimeout;
use crate::registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster {0} not found")]
    NotFound(String),
    #[error("cluster {0} already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Kube(#[from] KubeClientError),
    #[error("timed out waiting for cluster: {0}")]
    Timeout(#[from] PollTimeout),
    #[error("invariant violated: {0}")]
    Validation(String),
    #[error("{0}")]
    Fatal(String),
}

impl ClusterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::NotFound(_) => ErrorKind::NotFound,
            ClusterError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            ClusterError::Engine(e) => e.kind(),
            ClusterError::Registry(e) => e.kind(),
            ClusterError::Kube(e) => e.kind(),
            ClusterError::Timeout(_) => ErrorKind::Timeout,
            ClusterError::Validation(_) => ErrorKind::Validation,
            ClusterError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}
