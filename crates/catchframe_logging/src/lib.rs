//! Shared logging setup for CatchFrame binaries.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "catchframe=info,catchframe_pipeline=info,catchframe_store=info";

/// Logging configuration shared by CatchFrame binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Keeps the background file writer alive. Drop it last.
pub struct LogGuard {
    _file: WorkerGuard,
}

/// Initialize tracing with a daily rolling file and stderr output.
///
/// `RUST_LOG` overrides the default filter for both layers; `verbose` lifts
/// stderr to `debug` when no override is set.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let appender = tracing_appender::rolling::daily(&log_dir, log_file_name(config.app_name));
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if config.verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::new(DEFAULT_LOG_FILTER),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(config.verbose)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Global tracing subscriber already installed")?;

    Ok(LogGuard { _file: guard })
}

/// CatchFrame home directory: `$CATCHFRAME_HOME` or `~/.catchframe`.
pub fn catchframe_home() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("CATCHFRAME_HOME") {
        return Ok(PathBuf::from(override_path));
    }
    dirs::home_dir()
        .map(|home| home.join(".catchframe"))
        .context("Could not determine home directory; set CATCHFRAME_HOME")
}

pub fn logs_dir() -> Result<PathBuf> {
    Ok(catchframe_home()?.join("logs"))
}

pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir()?;
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

fn log_file_name(app_name: &str) -> String {
    let base: String = app_name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    format!("{}.log", base)
}
