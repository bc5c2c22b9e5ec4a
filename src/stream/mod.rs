//! Event stream codecs.
//!
//! Every on-disk or on-wire event format implements [`EventCodec`]. A codec is a
//! stateful iterator over its input: one call to [`EventCodec::read_event`] decodes
//! the next atomic unit at the current stream position and reports what it found
//! as an [`EventInputStatus`]. Formats that need several physical records before a
//! logical event is ready keep that state across calls and never block waiting for
//! more input than the installed stream holds.
//!
//! Two formats are provided:
//!
//! - [`l002::L002Codec`]: 16-bit marker-based words, one event at a time.
//! - [`caen::CaenCodec`]: 32-bit CAEN V7x5 module blocks, reassembled into events
//!   through a bounded FIFO keyed by the hardware event counter.

pub mod caen;
pub mod event_fifo;
pub mod header;
pub mod l002;
mod words;

pub use header::RunHeader;

use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

/// Result of one decode attempt.
///
/// Exactly one status is returned per [`EventCodec::read_event`] call. Only
/// [`EventInputStatus::Event`] means the event array holds a complete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventInputStatus {
    /// A complete event was written into the event array.
    Event,
    /// Part of an event was read; keep reading.
    PartialEvent,
    /// A block of scaler values was read; see [`EventCodec::scaler_values`].
    ScalerValue,
    /// The end of a buffer was reached.
    EndBuffer,
    /// The end-of-run marker was reached and all pending events were delivered.
    EndRun,
    /// The input stream is exhausted.
    EndFile,
    /// Padding or an unremarkable word was consumed.
    Ignore,
    /// A word the format does not know was consumed.
    UnknownWord,
}

impl fmt::Display for EventInputStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventInputStatus::Event => "EVENT",
            EventInputStatus::PartialEvent => "PARTIAL_EVENT",
            EventInputStatus::ScalerValue => "SCALER_VALUE",
            EventInputStatus::EndBuffer => "END_BUFFER",
            EventInputStatus::EndRun => "END_RUN",
            EventInputStatus::EndFile => "END_FILE",
            EventInputStatus::Ignore => "IGNORE",
            EventInputStatus::UnknownWord => "UNKNOWN_WORD",
        };
        f.write_str(label)
    }
}

/// What a decoder does after a word that does not belong where it was read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MalformedWordPolicy {
    /// Report the error and carry on with the next word.
    #[default]
    Continue,
    /// Report the error and discard words until the next module header or sentinel.
    Resync,
    /// Report the error and treat the rest of the input as exhausted.
    Abort,
}

/// Available event formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormat {
    /// ORNL L002 marker-based 16-bit format.
    L002,
    /// CAEN V7x5 ADC/TDC multiplexed 32-bit format.
    Caen,
}

impl StreamFormat {
    /// Human-readable description of the format.
    pub fn description(&self) -> &'static str {
        match self {
            StreamFormat::L002 => "L002 16-bit marker format",
            StreamFormat::Caen => "CAEN V7x5 multiplexed module blocks",
        }
    }

    /// Build a codec for this format.
    pub fn codec(&self, settings: &CodecSettings) -> Box<dyn EventCodec> {
        match self {
            StreamFormat::L002 => Box::new(l002::L002Codec::new(settings.event_size)),
            StreamFormat::Caen => Box::new(
                caen::CaenCodec::with_fifo_depth(settings.event_size, settings.fifo_depth)
                    .with_policy(settings.malformed_word),
            ),
        }
    }

    /// Largest event size the format can carry.
    pub fn max_event_size(&self) -> usize {
        match self {
            StreamFormat::L002 => l002::SCALER_PARAMETER_BASE,
            StreamFormat::Caen => caen::NUM_PARAMETERS,
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFormat::L002 => f.write_str("l002"),
            StreamFormat::Caen => f.write_str("caen"),
        }
    }
}

/// Parameters needed to construct a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSettings {
    /// Number of parameters per event.
    pub event_size: usize,
    /// Reassembly window for multiplexed formats.
    pub fifo_depth: usize,
    /// Reaction to malformed words.
    pub malformed_word: MalformedWordPolicy,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            event_size: 64,
            fifo_depth: caen::DEFAULT_FIFO_DEPTH,
            malformed_word: MalformedWordPolicy::Continue,
        }
    }
}

/// Read/write protocol shared by every event format.
///
/// A codec instance is driven by exactly one thread at a time; the sort daemon owns
/// its input codec and the output storage owns its output codec.
pub trait EventCodec: Send {
    /// The format this codec implements.
    fn format(&self) -> StreamFormat;

    /// Number of parameters per event.
    fn event_size(&self) -> usize;

    /// Install the stream subsequent reads come from. Decoder state that spans
    /// records (e.g. a reassembly FIFO) is kept.
    fn set_input(&mut self, input: Box<dyn Read + Send>);

    /// Drop the current input stream, if any.
    fn close_input(&mut self);

    /// Discard decoder state carried between inputs so the next input starts a
    /// fresh stream. Installed streams are left alone.
    fn reset(&mut self) {}

    /// Events decoded but held back waiting for more input.
    fn pending_events(&self) -> usize {
        0
    }

    /// Install the stream subsequent writes go to.
    fn set_output(&mut self, output: Box<dyn Write + Send>);

    /// Consume the format preamble from the input.
    fn read_header(&mut self) -> Result<(), CodecError>;

    /// Header decoded by the last successful [`read_header`](Self::read_header).
    fn header(&self) -> Option<&RunHeader>;

    /// Write the format preamble to the output.
    fn write_header(&mut self, header: &RunHeader) -> Result<(), CodecError>;

    /// Decode the next unit from the input into `event`.
    fn read_event(&mut self, event: &mut [i32]) -> Result<EventInputStatus, CodecError>;

    /// Encode one event to the output.
    fn write_event(&mut self, event: &[i32]) -> Result<(), CodecError>;

    /// Write the end-of-run marker.
    fn write_end_run(&mut self) -> Result<(), CodecError>;

    /// Flush buffered output.
    fn flush(&mut self) -> Result<(), CodecError>;

    /// Flush and drop the output stream.
    fn close_output(&mut self) -> Result<(), CodecError>;

    /// Whether `word` is this format's end-of-run marker.
    fn is_end_run(&self, word: u32) -> bool;

    /// Scaler values read by the last call that returned
    /// [`EventInputStatus::ScalerValue`].
    fn scaler_values(&self) -> &[i32] {
        &[]
    }
}
