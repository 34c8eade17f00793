use crate::error::{classify_kube_error, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum KubeClientError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Fatal(String),
}

impl KubeClientError {
    pub fn from_kube(err: kube::Error) -> Self {
        KubeClientError::Kube(err)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            KubeClientError::Kube(e) => classify_kube_error(e),
            KubeClientError::Timeout(_) => ErrorKind::Timeout,
            KubeClientError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}
