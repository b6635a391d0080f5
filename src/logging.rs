//! File logging for netfleet.
//!
//! Each run writes a timestamped file under `~/.netfleet/logs/`; files older
//! than the retention period are removed at startup.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Default log retention in hours.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 24;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log retention period in hours.
    pub retention_hours: u32,
    /// Log level (trace, debug, info, warn, error, off).
    pub level: String,
    /// Whether file logging is enabled.
    pub enabled: bool,
    /// Also write warnings and errors to stderr.
    pub to_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            level: DEFAULT_LOG_LEVEL.to_string(),
            enabled: true,
            to_stderr: false,
        }
    }
}

impl LogConfig {
    /// Parses a log level, falling back to the default for unknown names.
    #[must_use]
    pub fn parse_level(value: &str) -> String {
        match value.to_lowercase().as_str() {
            "trace" => "trace".to_string(),
            "debug" => "debug".to_string(),
            "info" => "info".to_string(),
            "warn" | "warning" => "warn".to_string(),
            "error" => "error".to_string(),
            "off" | "none" | "disabled" => "off".to_string(),
            _ => DEFAULT_LOG_LEVEL.to_string(),
        }
    }

    /// Parses retention hours.
    #[must_use]
    pub fn parse_retention(value: &str) -> Option<u32> {
        value.trim().parse().ok()
    }

    fn is_active(&self) -> bool {
        (self.enabled && self.level != "off") || self.to_stderr
    }
}

/// Returns the log directory path (~/.netfleet/logs/).
#[must_use]
pub fn log_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".netfleet")
        .join("logs")
}

/// Returns a fresh log file path in `dir`.
#[must_use]
pub fn log_path_in(dir: &Path) -> PathBuf {
    let now = chrono::Local::now();
    dir.join(format!("netfleet_{}.log", now.format("%Y-%m-%d_%H-%M-%S")))
}

/// Deletes `.log` files in `dir` older than `retention_hours`.
///
/// # Errors
/// Returns error if the directory cannot be read.
pub fn cleanup_old_logs(dir: &Path, retention_hours: u32) -> io::Result<u32> {
    if !dir.exists() {
        return Ok(0);
    }

    let retention = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut deleted = 0;

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        let expired = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > retention);
        if expired && fs::remove_file(&path).is_ok() {
            deleted += 1;
        }
    }

    Ok(deleted)
}

/// Initializes logging.
///
/// `RUST_LOG` overrides the configured level.
///
/// # Errors
/// Returns error if the log directory or file cannot be created.
pub fn init(config: &LogConfig) -> io::Result<()> {
    if !config.is_active() {
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let stderr_layer = config.to_stderr.then(|| {
        fmt::layer()
            .with_writer(io::stderr.with_max_level(tracing::Level::WARN))
            .with_target(false)
            .without_time()
    });

    let file_logging = config.enabled && config.level != "off";
    let mut deleted = 0;
    let mut log_path = None;
    let file_layer = if file_logging {
        let log_dir = log_directory();
        fs::create_dir_all(&log_dir)?;
        deleted = cleanup_old_logs(&log_dir, config.retention_hours)?;

        let path = log_path_in(&log_dir);
        let log_file = File::create(&path)?;
        log_path = Some(path);
        Some(
            fmt::layer()
                .with_writer(log_file.with_max_level(tracing::Level::TRACE))
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(false),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    if let Some(path) = log_path {
        tracing::info!("netfleet logging initialized");
        tracing::info!("Log file: {}", path.display());
        tracing::info!("Log level: {}", config.level);
        tracing::info!("Log retention: {} hours", config.retention_hours);
    }
    if deleted > 0 {
        tracing::info!("Cleaned up {} old log file(s)", deleted);
    }

    Ok(())
}
