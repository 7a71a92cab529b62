//! `tracing` setup for front ends built on the client.
//!
//! Events from `mcg_core` and the `mcg` binary are kept at the configured
//! level; dependencies (HTTP, image decoding, keyring) only report warnings.
//! `RUST_LOG` replaces the whole filter when set.
//!
//! Every request line the transport writes is logged at `trace` under the
//! `mcg_core::transport` target. Those lines go through
//! [`Command::loggable`](crate::command::Command::loggable), which replaces
//! the argument of `password` with `***`; nothing else in the crate logs
//! credentials.

use crate::config::{LogLevel, LoggingConfig};
use crate::paths::AppDirs;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILE_STEM: &str = "mcg.log";

/// Targets that follow the configured level.
const OWN_TARGETS: &[&str] = &["mcg_core", "mcg"];

/// Flushes the file writer when dropped; keep it alive for the whole run.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    log_file: PathBuf,
}

impl LoggingGuard {
    /// Base path of the daily-rolling log; the date is appended per day.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

/// Install the global subscriber: a daily-rolling file, plus stderr when
/// `config.stdout` is set.
pub fn init_logging(config: &LoggingConfig, dirs: &AppDirs) -> Result<LoggingGuard, LoggingError> {
    let log_dir = dirs.log_dir();
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDirectory {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => parse_filter(&directives)?,
        _ => parse_filter(&default_directives(config.level))?,
    };

    let file_stem = config.file_name.as_deref().unwrap_or(DEFAULT_FILE_STEM);
    cleanup_old_logs(log_dir, file_stem, config.max_log_files.max(1))?;
    let appender = tracing_appender::rolling::daily(log_dir, file_stem);
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer().with_ansi(false).with_writer(file_writer);
    let console_layer = config
        .stdout
        .then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| LoggingError::SubscriberInstall(Box::new(err)))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        log_file: log_dir.join(file_stem),
    })
}

/// `warn` globally, the configured level for our own targets.
fn default_directives(level: LogLevel) -> String {
    let level = level.as_filter_directive();
    let mut directives = String::from("warn");
    for target in OWN_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

fn parse_filter(directives: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directives).map_err(|source| LoggingError::ParseFilter {
        directives: directives.to_string(),
        source,
    })
}

/// Keep the newest `max_files` logs starting with `file_stem`.
fn cleanup_old_logs(dir: &Path, file_stem: &str, max_files: usize) -> Result<(), LoggingError> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|source| LoggingError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(file_stem))
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    if entries.len() <= max_files {
        return Ok(());
    }
    entries.sort_by_key(|(_, modified)| *modified);
    let excess = entries.len() - max_files;
    for (path, _) in entries.into_iter().take(excess) {
        tracing::debug!(path = %path.display(), "removing old log file");
        fs::remove_file(&path).map_err(|source| LoggingError::Cleanup { path, source })?;
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid log filter {directives:?}: {source}")]
    ParseFilter {
        directives: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInstall(Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to list log directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to remove old log file {path}: {source}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
}
