//! Logging configuration using the tracing ecosystem.
//!
//! This module configures structured logging with:
//! - Daily rotating file output
//! - Environment-based log level configuration
//! - Span-based context for async operations
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the application, which may call [`init`].

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Default log level if RUST_LOG is not set.
const DEFAULT_LOG_FILTER: &str = "jirakit=info,warn";

/// Log file name prefix.
const LOG_FILE_NAME: &str = "jirakit.log";

/// Initialize the logging system.
///
/// Sets up tracing with a daily rotating file appender in the user's local
/// data directory and a filter from `RUST_LOG`, falling back to
/// `jirakit=info,warn`.
///
/// # Log Directory
///
/// - Linux: `~/.local/share/jirakit/logs/`
/// - macOS: `~/Library/Application Support/jirakit/logs/`
/// - Windows: `C:\Users\<User>\AppData\Local\jirakit\logs\`
///
/// # Errors
///
/// Returns an error if the log directory cannot be determined or created, or
/// a global subscriber is already set.
///
/// # Example
///
/// ```no_run
/// jirakit::logging::init().expect("Failed to initialize logging");
/// ```
pub fn init() -> anyhow::Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter);

    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "jirakit logging started");
    tracing::debug!(log_dir = %log_dir.display(), "Log directory");

    Ok(())
}

/// Get the log directory path.
fn get_log_directory() -> anyhow::Result<PathBuf> {
    let base_dir = dirs::data_local_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine local data directory"))?;

    Ok(base_dir.join("jirakit").join("logs"))
}

/// Get the path where logs are stored.
pub fn log_directory() -> Option<PathBuf> {
    get_log_directory().ok()
}
