//! Tracing setup for hosts embedding the engine.
//!
//! Log files roll daily in a `logs` directory beside the settings file, and
//! info-level events are echoed to stdout. On an interactive terminal only
//! stdout is used. A host that already installed a subscriber keeps it.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::error::QdeskError;
use crate::models::settings::default_settings_path;

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "QDESK_LOG";

const LOG_DIR_NAME: &str = "logs";
const LOG_FILE_PREFIX: &str = "qdesk";

/// Where and what to log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory for rolling log files.
    pub log_dir: PathBuf,
    /// Filter directives overriding the environment.
    pub filter: Option<String>,
    /// Write log files as well as stdout.
    pub to_file: bool,
}

impl LogConfig {
    /// Log beside the settings file at `settings_path`.
    pub fn for_settings(settings_path: &Path) -> Self {
        let base = settings_path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            log_dir: base.join(LOG_DIR_NAME),
            filter: None,
            to_file: !atty::is(atty::Stream::Stdout),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::for_settings(&default_settings_path())
    }
}

/// Keeps the file writer alive. Dropping it flushes pending entries.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    installed: bool,
    _worker_guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// False when another subscriber was already installed.
    pub fn is_installed(&self) -> bool {
        self.installed
    }
}

/// Install the qdesk subscriber.
///
/// Falls back to stdout when the log directory cannot be used.
pub fn init_logging(config: LogConfig) -> LoggingGuard {
    if config.to_file {
        match file_writer(&config.log_dir) {
            Ok((file, guard)) => {
                let writer = std::io::stdout.with_max_level(tracing::Level::INFO).and(file);
                let installed = tracing_subscriber::fmt()
                    .with_writer(writer)
                    .with_env_filter(build_env_filter(config.filter.as_deref()))
                    .with_ansi(false)
                    .with_target(true)
                    .try_init()
                    .is_ok();
                if installed {
                    tracing::info!(log_dir = %config.log_dir.display(), "File logging enabled");
                }
                return finish(installed, Some(guard));
            }
            Err(e) => {
                eprintln!("Warning: {e}. Logging to stdout only.");
            }
        }
    }

    let installed = tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(config.filter.as_deref()))
        .with_target(false)
        .try_init()
        .is_ok();
    finish(installed, None)
}

/// Install the subscriber beside the default settings file.
pub fn init_logging_default() -> LoggingGuard {
    init_logging(LogConfig::default())
}

fn finish(installed: bool, worker_guard: Option<WorkerGuard>) -> LoggingGuard {
    if !installed {
        tracing::debug!("Tracing subscriber already installed, keeping it");
    }
    LoggingGuard { installed, _worker_guard: worker_guard.filter(|_| installed) }
}

fn file_writer(log_dir: &Path) -> Result<(NonBlocking, WorkerGuard), QdeskError> {
    std::fs::create_dir_all(log_dir).map_err(|e| {
        QdeskError::config(format!("Cannot create log directory {}: {e}", log_dir.display()))
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|e| QdeskError::config(format!("Cannot open log file: {e}")))?;

    // Query workers never wait on disk.
    Ok(tracing_appender::non_blocking(appender))
}

/// Explicit filter, else `QDESK_LOG`, else `RUST_LOG`, else the build default.
fn build_env_filter(custom: Option<&str>) -> EnvFilter {
    if let Some(filter) = custom {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(default_log_filter()));
    }

    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter()))
}

/// Default directives. Query cycles are traced per query id in debug builds.
pub fn default_log_filter() -> &'static str {
    #[cfg(debug_assertions)]
    {
        "info,qdesk_core::services::query=trace,qdesk_core=debug,tokio_postgres=warn,deadpool_postgres=warn"
    }
    #[cfg(not(debug_assertions))]
    {
        "warn,qdesk_core=info,tokio_postgres=warn,deadpool_postgres=warn"
    }
}
