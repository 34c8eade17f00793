use crate::error::ErrorKind;

/// Failure kinds for §4.1 ContainerEngine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("exec failed with exit code {code}: {stderr}")]
    ExecFailed { code: i64, stderr: String },
    #[error("{0}")]
    Fatal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Transient,
            EngineError::Transient(_) => ErrorKind::Transient,
            EngineError::ExecFailed { .. } => ErrorKind::Fatal,
            EngineError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}
