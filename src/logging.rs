//! Ambient logging setup, shared by the library and the thin CLI binary.
//!
//! Provides console logging via `tracing-subscriber` and an optional rolling file sink via
//! `tracing-appender`, keyed by cluster name the way a multi-cluster tool needs per-cluster
//! log files rather than one shared stream.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where logging output goes.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// Minimum level, e.g. "info", "debug". Overridden by `RUST_LOG`/`KSAIL_LOG` if set.
    pub level: String,
    /// Log file path; `{cluster_name}` is substituted if present. None disables the file sink.
    pub file: Option<String>,
}

/// Initialize the global `tracing` subscriber for one invocation.
///
/// `cluster_name` is substituted into `config.file`'s `{cluster_name}` placeholder, mirroring
/// the teacher's per-cluster log file convention.
pub fn init_logging(config: &LoggingConfig, cluster_name: &str) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let directive = std::env::var("KSAIL_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| config.level.clone());
    let env_filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer()
        .with_timer(fmt::time::ChronoLocal::new("%H:%M:%S%.3f".to_string()))
        .with_target(false);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    match &config.file {
        Some(file_template) => {
            let log_file = file_template.replace("{cluster_name}", cluster_name);
            let log_path = PathBuf::from(&log_file);
            let log_dir = log_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let log_filename = log_path
                .file_name()
                .context("invalid log filename")?
                .to_str()
                .context("invalid UTF-8 in log filename")?;

            std::fs::create_dir_all(&log_dir)
                .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(log_filename)
                .build(log_dir)
                .context("failed to create log file appender")?;

            let file_layer = fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                ))
                .with_target(false);

            registry
                .with(file_layer)
                .try_init()
                .context("failed to initialize tracing subscriber")?;
        }
        None => {
            registry
                .try_init()
                .context("failed to initialize tracing subscriber")?;
        }
    }

    let level = parse_log_level(&config.level).unwrap_or(Level::INFO);
    tracing::info!(cluster_name = %cluster_name, %level, "logging initialized");

    Ok(())
}

/// Parse a log level string into `tracing::Level`.
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("invalid log level: {}", level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("DEBUG"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warning"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));
        assert!(parse_log_level("nonsense").is_err());
    }
}
