//! CLI Entry Point for rust-sort
//!
//! Provides command-line interface for:
//! - Replaying event files offline (optionally writing a pre-sorted output file)
//! - Sorting buffers online from a front end connection or raw buffer file
//! - Checking the configuration
//!
//! # Usage
//!
//! Replay two runs:
//! ```bash
//! rust-sort offline run1.evn run2.evn --output presort.evn
//! ```
//!
//! Sort from a front end:
//! ```bash
//! rust-sort online --source 192.168.1.20:5002 --format caen
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_sort::config::{SortConfig, DEFAULT_CONFIG_PATH};
use rust_sort::logging::{self, OutputFormat, TracingConfig};
use rust_sort::sort::acquisition::OverflowPolicy;
use rust_sort::sort::{
    CounterSnapshot, OnlinePipeline, ParameterTally, ScalerTotals, SortParts, SortPipeline,
    ThreadState,
};
use rust_sort::stream::{MalformedWordPolicy, StreamFormat};
use std::fs::File;
use std::io::{BufReader, Read};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "rust-sort")]
#[command(about = "Event sorting for nuclear physics data acquisition", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured log format
    #[arg(long, global = true, value_enum)]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay event files
    Offline {
        /// Event files, sorted in the order given
        files: Vec<PathBuf>,

        /// List file naming more event files
        #[arg(long)]
        list: Option<PathBuf>,

        /// Add every .evn file in a directory
        #[arg(long = "dir")]
        directories: Vec<PathBuf>,

        /// Write sorted events to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Input event format
        #[arg(long, value_enum)]
        format: Option<StreamFormat>,

        /// Output event format (defaults to the input format)
        #[arg(long, value_enum)]
        output_format: Option<StreamFormat>,

        /// Reaction to malformed words
        #[arg(long, value_enum)]
        malformed_word: Option<MalformedWordPolicy>,
    },

    /// Sort buffers from a front end
    Online {
        /// Front end address (host:port) or raw buffer file
        #[arg(long)]
        source: Option<String>,

        /// Archive every received buffer to this file
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Input event format
        #[arg(long, value_enum)]
        format: Option<StreamFormat>,

        /// What to do when the ring buffer is full
        #[arg(long, value_enum)]
        overflow: Option<OverflowPolicy>,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SortConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.application.log_format = format;
    }

    match cli.command {
        Commands::Offline {
            files,
            list,
            directories,
            output,
            format,
            output_format,
            malformed_word,
        } => {
            let offline = &mut config.offline;
            offline.files.extend(files);
            offline.list = list.or(offline.list.take());
            offline.directories.extend(directories);
            offline.output = output.or(offline.output.take());
            if let Some(format) = format {
                config.sort.input_format = format;
            }
            if output_format.is_some() {
                config.sort.output_format = output_format;
            }
            if let Some(policy) = malformed_word {
                config.sort.malformed_word = policy;
            }
            start(&config)?;
            run_offline(&config)
        }
        Commands::Online {
            source,
            archive,
            format,
            overflow,
        } => {
            config.online.source = source.or(config.online.source.take());
            config.online.archive = archive.or(config.online.archive.take());
            if let Some(format) = format {
                config.sort.input_format = format;
            }
            if let Some(policy) = overflow {
                config.ring.overflow = policy;
            }
            start(&config)?;
            run_online(&config)
        }
        Commands::CheckConfig => {
            config.validate()?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn start(config: &SortConfig) -> Result<()> {
    config.validate()?;
    logging::init(TracingConfig::from_sort_config(config)?)?;
    info!(
        name = %config.application.name,
        input = %config.sort.input_format,
        event_size = config.sort.event_size,
        "Starting"
    );
    Ok(())
}

fn run_offline(config: &SortConfig) -> Result<()> {
    let pipeline = SortPipeline::offline(
        config,
        ParameterTally::new(config.sort.event_size),
        ScalerTotals::new(),
    )?;
    let files = pipeline.controller().with_storage(|storage| storage.files().len());
    info!(files, "Offline sort");

    pipeline.begin_sort()?;
    while !pipeline.wait_for_sort_end(PROGRESS_INTERVAL) {
        info!(counters = %pipeline.counters(), "Sorting");
    }

    let counters = pipeline.counters();
    let parts = pipeline.join()?;
    report(&counters, &parts);
    Ok(())
}

fn run_online(config: &SortConfig) -> Result<()> {
    let Some(source) = config.online.source.as_deref() else {
        bail!("No online source configured (use --source or [online] source)");
    };
    let reader = open_source(source)?;

    let pipeline = OnlinePipeline::start(
        config,
        reader,
        ParameterTally::new(config.sort.event_size),
        ScalerTotals::new(),
    )?;
    info!(source, capacity = pipeline.ring().capacity(), "Online sort");

    pipeline.begin()?;
    while !pipeline.wait_until_drained(PROGRESS_INTERVAL) {
        // The sort daemon parks itself at every end of run
        if pipeline.state() == ThreadState::Suspend {
            info!(runs = pipeline.runs_ended(), "Run ended, resuming");
            pipeline.begin()?;
            continue;
        }
        info!(
            counters = %pipeline.counters(),
            buffered = pipeline.ring().len(),
            "Sorting"
        );
    }

    let counters = pipeline.counters();
    info!(runs = pipeline.runs_ended(), "Source exhausted");
    let parts = pipeline.join()?;
    report(&counters, &parts);
    Ok(())
}

/// An existing path is replayed as a raw buffer file, anything else is
/// treated as a front end address.
fn open_source(source: &str) -> Result<Box<dyn Read + Send>> {
    let path = Path::new(source);
    if path.exists() {
        let file = File::open(path).with_context(|| format!("opening {source}"))?;
        return Ok(Box::new(BufReader::new(file)));
    }
    let stream = TcpStream::connect(source).with_context(|| format!("connecting to {source}"))?;
    Ok(Box::new(stream))
}

fn report(counters: &CounterSnapshot, parts: &SortParts<ParameterTally, ScalerTotals>) {
    info!(counters = %counters, "Finished");
    info!(
        events = parts.sorter.events(),
        active_parameters = parts.sorter.active().count(),
        scaler_blocks = parts.scalers.blocks(),
        "Summary"
    );
    for (parameter, hits) in parts.sorter.active() {
        debug!(parameter, hits, "Parameter");
    }
    for (index, total) in parts.scalers.totals().iter().enumerate() {
        if *total != 0 {
            debug!(index, total, "Scaler");
        }
    }
}
