use crate::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yml::Error,
    },
    #[error("invariant violated: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::NotFound(_) => ErrorKind::NotFound,
            ConfigError::Io { .. } => ErrorKind::Fatal,
            ConfigError::Parse { .. } => ErrorKind::Validation,
            ConfigError::Validation(_) => ErrorKind::Validation,
        }
    }
}
