//! File-backed `tracing` setup.
//!
//! The TUI owns the terminal, so nothing is ever written to stdout/stderr;
//! events go to the configured log file. `RUST_LOG` overrides the level.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

static LOGGING_INITIALIZED: OnceLock<PathBuf> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log filter {0:?}")]
    InvalidFilter(String),

    #[error("failed to open log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn build_filter(level: &str) -> Result<EnvFilter, LogError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|_| LogError::InvalidFilter(level.to_string())),
    }
}

fn open_log_file(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Installs the global subscriber. Returns `Ok(None)` when no log file is
/// configured, in which case events are dropped.
pub fn init_logging(config: &LogConfig) -> Result<Option<PathBuf>, LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }
    let Some(path) = config.file.clone() else {
        return Ok(None);
    };

    let filter = build_filter(&config.level)?;
    let file = open_log_file(&path)?;
    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_target(true)
            .with_ansi(false),
    );
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = LOGGING_INITIALIZED.set(path.clone());

    tracing::info!(
        log_level = %config.level,
        log_file = %path.display(),
        version = crate::VERSION,
        "logging initialized"
    );
    Ok(Some(path))
}
