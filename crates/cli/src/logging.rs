//! Logging setup for the CLI

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Parse log level from a CLI string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize logging to stderr, and to `log_file` when given.
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_logging(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let level = parse_log_level(level);

  // RUST_LOG overrides the CLI level
  let env_filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();

  let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let Some(path) = log_file else {
    tracing_subscriber::registry().with(env_filter).with(console).init();
    return Ok(None);
  };

  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| Path::new("."));
  let file_name = path
    .file_name()
    .with_context(|| format!("Log file path has no file name: {}", path.display()))?;

  std::fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory {}", dir.display()))?;

  let file_appender = tracing_appender::rolling::never(dir, file_name);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(env_filter)
    .with(console)
    .with(
      fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false),
    )
    .init();

  Ok(Some(guard))
}
