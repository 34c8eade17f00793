use crate::error::ErrorKind;
use crate::kube_client::KubeClientError;

#[derive(Debug, thiserror::Error)]
pub enum GitOpsError {
    #[error(transparent)]
    Kube(#[from] KubeClientError),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("{0}")]
    Fatal(String),
}

impl GitOpsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GitOpsError::Kube(e) => e.kind(),
            GitOpsError::Timeout(_) => ErrorKind::Timeout,
            GitOpsError::Validation(_) => ErrorKind::Validation,
            GitOpsError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}
