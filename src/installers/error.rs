use crate::error::ErrorKind;
use crate::kube_client::KubeClientError;

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error(transparent)]
    Kube(#[from] KubeClientError),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("{0}")]
    Fatal(String),
}

impl InstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::Kube(e) => e.kind(),
            InstallError::Timeout(_) => ErrorKind::Timeout,
            InstallError::Validation(_) => ErrorKind::Validation,
            InstallError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}
