//! Logging initialization
//!
//! Log lines go to stderr and, for the daemon, to a persistent log file:
//! `~/Library/Logs/auto-sidecar.log` on macOS, the local data directory
//! elsewhere. `RUST_LOG` overrides the default filter.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_NAME: &str = "auto-sidecar.log";

/// Location of the persistent log file
pub fn log_file_path() -> Option<PathBuf> {
    if cfg!(target_os = "macos") {
        dirs::home_dir().map(|home| home.join("Library").join("Logs").join(LOG_FILE_NAME))
    } else {
        dirs::data_local_dir().map(|dir| dir.join("auto-sidecar").join(LOG_FILE_NAME))
    }
}

/// Install the global subscriber
///
/// With `to_file`, the returned guard must be kept alive for buffered lines
/// to reach the log file.
pub fn init(verbose: bool, to_file: bool) -> Result<Option<WorkerGuard>> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let (file_layer, guard) = match to_file.then(log_file_path).flatten() {
        Some(path) => {
            let dir = path
                .parent()
                .context("Log file path has no parent directory")?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {:?}", dir))?;
            let file_name = path.file_name().context("Log file path has no file name")?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(false)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name() {
        if let Some(path) = log_file_path() {
            assert!(path.ends_with(LOG_FILE_NAME));
        }
    }
}
