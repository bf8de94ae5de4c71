use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

struct LogState {
    path: PathBuf,
    _guard: WorkerGuard,
}

static LOG_STATE: OnceCell<LogState> = OnceCell::new();

/// Installs the file-backed subscriber once per process and returns the log
/// file in use. `level` is an `EnvFilter` directive; `RUST_LOG` wins when set.
pub fn init_tracing(log_file: &Path, level: &str) -> Result<PathBuf, String> {
    let state = LOG_STATE.get_or_try_init(|| -> Result<LogState, String> {
        let directory = log_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = log_file
            .file_name()
            .ok_or_else(|| format!("Invalid log file path: {}", log_file.display()))?;

        std::fs::create_dir_all(directory)
            .map_err(|e| format!("Failed to create log directory {}: {}", directory.display(), e))?;

        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| format!("Invalid log level '{}': {}", level, e))?;

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_thread_names(true),
            )
            .with(filter)
            .try_init()
            .map_err(|e| format!("Failed to install tracing subscriber: {}", e))?;

        tracing::info!("LOG_INIT: writing to {}", log_file.display());
        Ok(LogState {
            path: log_file.to_path_buf(),
            _guard: guard,
        })
    })?;

    Ok(state.path.clone())
}
