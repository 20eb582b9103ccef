//! # Tracing Setup
//!
//! Console plus JSON-file logging for the binaries. Each run writes to a fresh
//! timestamped file; files from earlier runs of the same app are pruned so
//! only the most recent ones stay on disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log files from earlier runs that survive a new run.
pub const KEEP_PREVIOUS_LOGS: usize = 1;

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. The returned guard flushes the file
/// writer on drop, so keep it alive for the whole program.
///
/// # Errors
/// Fails when the log directory cannot be created or a global subscriber is
/// already installed.
pub fn setup_logging(app_name: &str, log_dir: &Path, level: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir).with_context(|| format!("creating log dir {}", log_dir.display()))?;
    let removed = cleanup_old_logs(log_dir, app_name, KEEP_PREVIOUS_LOGS)?;

    let file_name = log_file_name(app_name, &chrono::Local::now());
    let (writer, guard) = non_blocking(rolling::never(log_dir, &file_name));

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{level}'"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    info!(file = %file_name, removed, "Logging initialized with level: {}", level);
    Ok(guard)
}

/// `{app}_{YYYY-mm-dd_HH-MM-SS}.log`; names sort in creation order.
pub fn log_file_name(app_name: &str, now: &chrono::DateTime<chrono::Local>) -> String {
    format!("{}_{}.log", app_name, now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Deletes all but the newest `keep` log files of `app_name` in `log_dir`.
/// Returns how many were removed.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> Result<usize> {
    let pattern = log_dir.join(format!("{app_name}_*.log"));
    let pattern = pattern.to_string_lossy();

    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("bad log pattern {pattern}"))?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();

    let excess = files.len().saturating_sub(keep);
    let mut removed = 0;
    for path in files.into_iter().take(excess) {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}
