use crate::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry already exists: {0}")]
    AlreadyExists(String),
    #[error("registry not found: {0}")]
    NotFound(String),
    #[error("registry {name} not ready: {reason}")]
    NotReady { name: String, reason: String },
    #[error("registry {0} has no host-bound port")]
    PortNotFound(String),
    #[error(transparent)]
    Engine(#[from] crate::container_engine::EngineError),
    #[error("{0}")]
    Fatal(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::NotReady { .. } => ErrorKind::Timeout,
            RegistryError::PortNotFound(_) => ErrorKind::NotFound,
            RegistryError::Engine(e) => e.kind(),
            RegistryError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}
