//! Logging setup for the CoinJoin client.
//!
//! Thin `tracing` initialization: console output and, optionally, a
//! daily-rolled log file written through a non-blocking appender. Embedders
//! that already install their own subscriber can skip this module entirely.

use std::fs;
use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{LoggingError, LoggingResult};

/// Base name of the log file; the roller appends the date.
const LOG_FILE_NAME: &str = "dash-coinjoin.log";

/// Guard that must be kept alive to ensure log flushing on shutdown.
#[derive(Debug)]
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Configuration for logging output.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter. If None, falls back to `RUST_LOG` or INFO.
    pub level: Option<LevelFilter>,
    /// Whether to output logs to console (stderr).
    pub console: bool,
    /// Optional file logging configuration.
    pub file: Option<LogFileConfig>,
}

/// Configuration for log file output.
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    /// Directory where log files will be stored, created if absent.
    pub log_dir: PathBuf,
}

/// Initialize console-only logging with the given level.
pub fn init_console_logging(level: LevelFilter) -> LoggingResult<LoggingGuard> {
    init_logging(LoggingConfig {
        level: Some(level),
        console: true,
        file: None,
    })
}

/// Initialize logging with the given configuration.
///
/// Returns a [`LoggingGuard`] that must be kept alive for the duration of
/// the application; dropping it flushes buffered entries. If neither console
/// nor file output is enabled, logging is disabled and Ok is returned.
pub fn init_logging(config: LoggingConfig) -> LoggingResult<LoggingGuard> {
    if !config.console && config.file.is_none() {
        return Ok(LoggingGuard {
            _worker_guard: None,
        });
    }

    let env_filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    };

    let (file_layer, guard) = match &config.file {
        Some(file_config) => {
            let (writer, guard) = file_writer(file_config)?;
            let layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = config.console.then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInit(e.to_string()))?;

    Ok(LoggingGuard {
        _worker_guard: guard,
    })
}

/// Create the log directory and open a non-blocking daily-rolled writer.
fn file_writer(config: &LogFileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&config.log_dir)?;
    let appender = rolling::daily(&config.log_dir, LOG_FILE_NAME);
    Ok(tracing_appender::non_blocking(appender))
}
