//! Logging setup.
//!
//! Daemons log through `tracing`; this module installs the global subscriber
//! from a [`TracingConfig`] built by hand or from a [`SortConfig`]. `RUST_LOG`
//! overrides the configured level when set.
//!
//! # Example
//! ```no_run
//! use rust_sort::{config::SortConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SortConfig::load()?;
//! logging::init_from_config(&config)?;
//!
//! info!(files = config.offline.files.len(), "Ready to sort");
//! # Ok(())
//! # }
//! ```

use crate::config::SortConfig;
use crate::error::{AppResult, SortError};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Multi-line, coloured (for development)
    Pretty,
    /// One line per event (for production)
    #[default]
    Compact,
    /// JSON objects (for log aggregation)
    Json,
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Maximum level logged unless `RUST_LOG` says otherwise
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to include thread names (`sort-daemon`, `acquisition-daemon`)
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors (Pretty only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Options at `level`, defaults otherwise.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Options from the `application` section of the configuration.
    pub fn from_sort_config(config: &SortConfig) -> AppResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
            ..Default::default()
        })
    }

    /// Set output format
    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable file and line numbers
    #[must_use]
    pub fn with_file_and_line(mut self, enabled: bool) -> Self {
        self.with_file_and_line = enabled;
        self
    }

    /// Enable or disable ANSI colors
    #[must_use]
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the subscriber described by the configuration file.
pub fn init_from_config(config: &SortConfig) -> AppResult<()> {
    init(TracingConfig::from_sort_config(config)?)
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed (tests, embedding
/// applications) this returns `Ok(())`.
pub fn init(config: TracingConfig) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer = fmt::layer()
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_names(config.with_thread_names);

    let layer = match config.format {
        OutputFormat::Pretty => layer.pretty().with_ansi(config.with_ansi).with_filter(filter).boxed(),
        OutputFormat::Compact => layer.compact().with_ansi(false).with_filter(filter).boxed(),
        OutputFormat::Json => layer.json().with_filter(filter).boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        Err(err) if err.to_string().contains("already been set") => Ok(()),
        Err(err) => Err(SortError::Configuration(format!(
            "Failed to initialize logging: {err}"
        ))),
    }
}

/// Parse a level name, case-insensitively.
pub fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(SortError::Configuration(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}
