use crate::common::model::config::LoggerConfig as LoggerSettings;
use once_cell::sync::OnceCell;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_log::LogTracer;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

// Hold the non-blocking writer guard to keep the background logging thread alive
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

const DEFAULT_LOG_LEVEL: &str = "info,hyper=warn,h2=warn,reqwest=warn";

/// Logger configuration structure
///
/// ```
/// use std::path::PathBuf;
/// use crawlhub::utils::logger::LoggerConfig;
///
/// let config = LoggerConfig::new()
///     .with_level("debug")
///     .with_file_path(PathBuf::from("./logs/indexer"))
///     .with_console(true);
/// assert_eq!(config.level, "debug");
/// ```
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Optional file path prefix for the daily-rolling log file
    pub file_path: Option<PathBuf>,
    /// Whether to enable console output
    pub enable_console: bool,
    /// Whether to use JSON format for logs
    pub json_format: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file_path: None,
            enable_console: true,
            json_format: false,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: impl AsRef<str>) -> Self {
        self.level = level.as_ref().into();
        self
    }

    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_console(mut self, enable: bool) -> Self {
        self.enable_console = enable;
        self
    }

    pub fn with_json(mut self, enable: bool) -> Self {
        self.json_format = enable;
        self
    }

    /// Logger of a process, from the `[logger]` table of its configuration.
    pub fn for_process(settings: Option<&LoggerSettings>) -> Self {
        let mut config = Self::default();
        if let Some(settings) = settings {
            if let Some(level) = &settings.level {
                config.level = level.clone();
            }
            config.file_path = settings.file_path.as_ref().map(PathBuf::from);
            config.enable_console = settings.console.unwrap_or(true);
            config.json_format = settings.json.unwrap_or(false);
        }
        config
    }

    pub fn init(self) -> Result<bool, Box<dyn std::error::Error>> {
        init_logger(self)
    }
}

pub fn is_logging_disabled() -> bool {
    let value = env::var("CRAWLHUB_DISABLE_LOGS").unwrap_or_default();
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Installs the global subscriber. Returns `Ok(false)` when logging is
/// disabled through the environment or a logger is already installed.
pub fn init_logger(config: LoggerConfig) -> Result<bool, Box<dyn std::error::Error>> {
    if is_logging_disabled() {
        LOGGER_INITIALIZED.store(true, Ordering::SeqCst);
        return Ok(false);
    }
    if LOGGER_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::warn!("Logger already initialized, skipping re-initialization");
        return Ok(false);
    }

    // bridge log crate
    let _ = LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(local_offset, Rfc3339);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.enable_console {
        if config.json_format {
            layers.push(fmt::layer().json().with_timer(timer.clone()).boxed());
        } else {
            layers.push(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_timer(timer.clone())
                    .boxed(),
            );
        }
    }

    if let Some(file_path) = config.file_path {
        let directory = file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&directory)?;
        let file_path_prefix = file_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "crawlhub".to_string());
        let file_appender = tracing_appender::rolling::Builder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix(file_path_prefix)
            .filename_suffix("log")
            .build(&directory)?;

        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        let _ = FILE_GUARD.set(guard);

        let layer = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_timer(timer.clone())
                .boxed()
        } else {
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_timer(timer.clone())
                .boxed()
        };
        layers.push(layer);
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_config_builder() {
        let config = LoggerConfig::new()
            .with_level("debug")
            .with_file_path(PathBuf::from("./test.log"))
            .with_console(false)
            .with_json(true);

        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("./test.log")));
        assert!(!config.enable_console);
        assert!(config.json_format);
    }

    #[test]
    fn test_for_process_reads_settings() {
        let settings = LoggerSettings {
            level: Some("warn".to_string()),
            file_path: Some("logs/indexer".to_string()),
            json: Some(true),
            console: Some(false),
        };
        let config = LoggerConfig::for_process(Some(&settings));
        assert_eq!(config.level, "warn");
        assert_eq!(config.file_path, Some(PathBuf::from("logs/indexer")));
        assert!(config.json_format);
        assert!(!config.enable_console);

        let defaults = LoggerConfig::for_process(None);
        assert_eq!(defaults.level, DEFAULT_LOG_LEVEL);
        assert!(defaults.enable_console);
    }

    #[test]
    fn test_second_init_is_a_no_op() {
        let _ = init_logger(LoggerConfig::new().with_level("info"));
        assert!(!init_logger(LoggerConfig::new()).unwrap());
        log::info!("logger bridged");
    }
}
