//! Shared error-kind taxonomy used across every subsystem.
//!
//! Each component defines its own `thiserror` enum for its own failure modes, but every
//! variant maps onto one of these kinds so retry/propagation logic can match on kind rather
//! than re-deriving it from error text at each call site.

use std::fmt;

/// The error kinds from the error-handling design: every surfaced error is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad config, unmet invariant, unsupported combination.
    Validation,
    /// Entity absent; usually idempotency, sometimes fatal depending on the operation.
    NotFound,
    /// Surfaced by create operations; callers decide whether to treat as ok.
    AlreadyExists,
    /// Retryable: service-unavailable, request timeout, rate-limited, conflict, connection
    /// refused/reset, server-unknown-resource, no-matches-for-kind.
    Transient,
    /// Deadline exceeded after retries; carries the last underlying error.
    Timeout,
    /// Everything else; unwinds the current command.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Substrings that mark a `kube`/`bollard` error as retryable (§7, §9).
pub const TRANSIENT_SUBSTRINGS: &[&str] = &[
    "the server could not find the requested resource",
    "no matches for kind",
    "connection refused",
    "connection reset",
    "service unavailable",
    "request timeout",
    "too many requests",
    "rate limit",
];

/// Classify a free-text error message using the exact substring set from §7/§9.
///
/// Matching is case-insensitive; any error carrying one of `TRANSIENT_SUBSTRINGS` is
/// considered retryable, everything else is not (Testable Property 6).
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_SUBSTRINGS
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Classify a `kube::Error` by both its structured status code and its display text.
pub fn classify_kube_error(err: &kube::Error) -> ErrorKind {
    if let kube::Error::Api(resp) = err {
        return match resp.code {
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Transient,
            408 | 429 | 503 | 504 => ErrorKind::Transient,
            _ if is_transient_message(&resp.message) => ErrorKind::Transient,
            _ => ErrorKind::Fatal,
        };
    }
    if is_transient_message(&err.to_string()) {
        ErrorKind::Transient
    } else {
        ErrorKind::Fatal
    }
}

/// Top-level error aggregating every subsystem, used at the binary's edge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    ContainerEngine(#[from] crate::container_engine::EngineError),
    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),
    #[error(transparent)]
    Cluster(#[from] crate::cluster::ClusterError),
    #[error(transparent)]
    Kube(#[from] crate::kube_client::KubeClientError),
    #[error(transparent)]
    Install(#[from] crate::installers::InstallError),
    #[error(transparent)]
    GitOps(#[from] crate::gitops::GitOpsError),
    #[error(transparent)]
    ImageExchange(#[from] crate::image_exchange::ImageExchangeError),
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Best-effort error kind for the aggregate, used to pick a process exit code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(e) => e.kind(),
            Error::ContainerEngine(e) => e.kind(),
            Error::Registry(e) => e.kind(),
            Error::Cluster(e) => e.kind(),
            Error::Kube(e) => e.kind(),
            Error::Install(e) => e.kind(),
            Error::GitOps(e) => e.kind(),
            Error::ImageExchange(e) => e.kind(),
            Error::Other(_) => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_substrings_match_case_insensitively() {
        assert!(is_transient_message("No matches for kind \"Instance\""));
        assert!(is_transient_message("dial tcp: connection refused"));
        assert!(is_transient_message("rpc error: rate limit exceeded"));
        assert!(!is_transient_message("field is immutable"));
        assert!(!is_transient_message("unauthorized"));
    }
}
