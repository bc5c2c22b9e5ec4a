//! Configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/sort.toml` (or any file given to [`SortConfig::load_from`])
//! 2. Environment variables prefixed with `RUST_SORT_`; nested keys are separated
//!    by a double underscore, e.g. `RUST_SORT_SORT__EVENT_SIZE=128`
//!
//! Every field has a default, so a missing or empty file is a valid configuration.
//!
//! # Example
//! ```no_run
//! use rust_sort::config::SortConfig;
//!
//! let config = SortConfig::load()?;
//! config.validate()?;
//! println!("Sorting {} events", config.sort.input_format);
//! # Ok::<(), rust_sort::error::SortError>(())
//! ```

use crate::data::ring_buffer::{DEFAULT_CAPACITY, DEFAULT_POLL_INTERVAL};
use crate::error::{AppResult, SortError};
use crate::logging::OutputFormat;
use crate::sort::acquisition::OverflowPolicy;
use crate::sort::sort_daemon::DEFAULT_EVENTS_PER_POLL;
use crate::stream::caen::DEFAULT_FIFO_DEPTH;
use crate::stream::{CodecSettings, MalformedWordPolicy, RunHeader, StreamFormat};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/sort.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "RUST_SORT_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Ring buffer between acquisition and sorting
    pub ring: RingConfig,
    /// Decoding and dispatch
    pub sort: SortSettings,
    /// Offline replay
    pub offline: OfflineConfig,
    /// Online acquisition
    pub online: OnlineConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line layout
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "rust-sort".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Ring buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Number of 8 KiB buffers
    pub capacity: usize,
    /// How often blocked waits re-check state
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// What to do when the ring is full
    pub overflow: OverflowPolicy,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Decoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SortSettings {
    /// Format of incoming events
    pub input_format: StreamFormat,
    /// Format of the pre-sort output file; defaults to the input format
    pub output_format: Option<StreamFormat>,
    /// Parameters per event
    pub event_size: usize,
    /// Reassembly window for multiplexed input
    pub fifo_depth: usize,
    /// Decode calls between state polls when replaying files
    pub events_per_poll: usize,
    /// Reaction to malformed words
    pub malformed_word: MalformedWordPolicy,
}

impl Default for SortSettings {
    fn default() -> Self {
        Self {
            input_format: StreamFormat::L002,
            output_format: None,
            event_size: 64,
            fifo_depth: DEFAULT_FIFO_DEPTH,
            events_per_poll: DEFAULT_EVENTS_PER_POLL,
            malformed_word: MalformedWordPolicy::default(),
        }
    }
}

impl SortSettings {
    /// Settings for the input codec.
    pub fn input_codec(&self) -> CodecSettings {
        CodecSettings {
            event_size: self.event_size,
            fifo_depth: self.fifo_depth,
            malformed_word: self.malformed_word,
        }
    }

    /// Format used for the pre-sort output file.
    pub fn output_format(&self) -> StreamFormat {
        self.output_format.unwrap_or(self.input_format)
    }
}

/// Offline replay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Event files, in order
    pub files: Vec<PathBuf>,
    /// List file naming more event files
    pub list: Option<PathBuf>,
    /// Directories whose `*.evn` files are added
    pub directories: Vec<PathBuf>,
    /// Pre-sort output file
    pub output: Option<PathBuf>,
    /// Title written to the output header when no input header was read
    pub run_title: String,
    /// Run number written to the output header when no input header was read
    pub run_number: i32,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            list: None,
            directories: Vec::new(),
            output: None,
            run_title: "Presorted events".to_string(),
            run_number: 0,
        }
    }
}

impl OfflineConfig {
    /// Header used for output files.
    pub fn output_header(&self, event_size: usize) -> RunHeader {
        RunHeader::new(self.run_title.clone(), self.run_number, event_size)
    }
}

/// Online acquisition configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OnlineConfig {
    /// Front end address (`host:port`) or raw buffer file
    pub source: Option<String>,
    /// File every received buffer is archived to
    pub archive: Option<PathBuf>,
}

impl SortConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// Environment variables override the file, e.g.
    /// `RUST_SORT_APPLICATION__LOG_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Check values that parse but make no sense.
    pub fn validate(&self) -> AppResult<()> {
        crate::logging::parse_log_level(&self.application.log_level)?;

        if self.ring.capacity == 0 {
            return Err(SortError::Configuration(
                "ring.capacity must be at least 1".to_string(),
            ));
        }
        if self.ring.poll_interval.is_zero() {
            return Err(SortError::Configuration(
                "ring.poll_interval must be greater than zero".to_string(),
            ));
        }

        let sort = &self.sort;
        if sort.event_size == 0 {
            return Err(SortError::Configuration(
                "sort.event_size must be at least 1".to_string(),
            ));
        }
        for format in [sort.input_format, sort.output_format()] {
            if sort.event_size > format.max_event_size() {
                return Err(SortError::Configuration(format!(
                    "sort.event_size {} exceeds the {} parameters the {} format can carry",
                    sort.event_size,
                    format.max_event_size(),
                    format
                )));
            }
        }
        if sort.fifo_depth == 0 {
            return Err(SortError::Configuration(
                "sort.fifo_depth must be at least 1".to_string(),
            ));
        }
        if sort.events_per_poll == 0 {
            return Err(SortError::Configuration(
                "sort.events_per_poll must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
