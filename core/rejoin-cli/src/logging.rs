//! File logging for the CLI.
//!
//! Output goes to `~/.rejoin/logs/rejoin-cli.log` so stdout stays clean for
//! command results. When the directory cannot be created the CLI runs without
//! a log file.

use fs_err as fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "rejoin-cli.log";

pub fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".rejoin").join("logs"))
}

/// Installs the subscriber. Keep the returned guard alive until exit or
/// buffered lines are lost.
pub fn init() -> Option<WorkerGuard> {
    let dir = log_dir()?;
    if fs::create_dir_all(&dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::never(&dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;

    Some(guard)
}
