/// Logging configuration.
///
/// Logs go to stderr and to `{data_dir}/logs/whysoviral.log`.
/// Each process start appends a separator line to the log file.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_NAME: &str = "whysoviral.log";

const DEFAULT_FILTER: &str = "info,whysoviral=debug";

pub fn log_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join("logs").join(LOG_FILE_NAME)
}

/// Initializes logging for one process run.
///
/// # Arguments
///
/// * `data_dir` - Service data directory; logs live under `logs/`
/// * `session` - Label written in the separator (e.g. the CLI command)
pub fn init_logging(data_dir: &Path, session: &str) -> Result<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    write_separator(&log_dir, session);

    let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME);

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    // RUST_LOG overrides the default filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .ok(); // Ignore error if already initialized

    tracing::info!(session, log_file = %log_file_path(data_dir).display(), "logging initialized");

    Ok(())
}

fn write_separator(log_dir: &Path, session: &str) {
    use std::io::Write;

    let separator = format!(
        "\n{sep}\n[{ts}] New session: {session}\n{sep}\n",
        sep = "=".repeat(80),
        ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        session = session
    );

    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))
    {
        let _ = writeln!(file, "{}", separator);
    }
}
