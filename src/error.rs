//! Custom error types for the sorting pipeline.
//!
//! This module defines the error types shared by every layer of the crate. Using the
//! `thiserror` crate, it provides a centralized and consistent way to handle the
//! different kinds of failures that can occur while moving buffers between threads,
//! decoding event streams and managing event files.
//!
//! ## Error Hierarchy
//!
//! - **`SortError`**: the crate-level error. Wraps configuration, I/O, codec and ring
//!   errors so the `?` operator works across module boundaries.
//! - **`CodecError`**: raised by an event stream codec. A malformed word carries the
//!   offending value and the byte position at which it was read, so the caller can
//!   log something actionable.
//! - **`RingFull`**: a `put` into a ring that already holds `capacity` unread buffers.
//!   This is a caller-visible condition, never silent data loss.

use std::io;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, SortError>;

/// Crate-level error.
#[derive(Error, Debug)]
pub enum SortError {
    /// The configuration could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration parsed but holds an invalid value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An event stream could not be decoded or encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The ring buffer rejected a buffer.
    #[error(transparent)]
    RingFull(#[from] RingFull),

    /// A daemon thread could not be started.
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        /// Name of the thread that failed to start.
        name: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// A daemon thread panicked instead of returning.
    #[error("{0} thread panicked")]
    ThreadPanicked(String),

    /// The daemon was already stopped; `STOP` is terminal.
    #[error("Daemon is stopped")]
    Stopped,
}

impl From<figment::Error> for SortError {
    fn from(err: figment::Error) -> Self {
        SortError::Config(Box::new(err))
    }
}

/// Errors produced by an event stream codec.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A word that does not fit the position in the stream, e.g. a header where a
    /// parameter or end-of-block was expected.
    #[error("unexpected word 0x{word:08X} at byte {position}: expected {expected}")]
    UnexpectedWord {
        /// The offending word.
        word: u32,
        /// Byte offset of the word within the current input.
        position: u64,
        /// What the decoder was looking for.
        expected: &'static str,
    },

    /// The run header record is missing or corrupt.
    #[error("bad run header: {0}")]
    BadHeader(String),

    /// An event parameter number cannot be represented in the output format.
    #[error("parameter number {0} out of range")]
    ParameterOutOfRange(usize),

    /// A parameter value does not fit the output format's value field.
    #[error("parameter {parameter} value {value} out of range")]
    ValueOutOfRange {
        /// Index of the parameter within the event.
        parameter: usize,
        /// The value that could not be encoded.
        value: i32,
    },

    /// The operation needs an input stream and none is installed.
    #[error("no input stream installed")]
    NoInput,

    /// The operation needs an output stream and none is installed.
    #[error("no output stream installed")]
    NoOutput,

    /// Reading or writing the underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Whether decoding may continue on the same stream after this error.
    ///
    /// Malformed words leave the stream positioned after the offending word, so the
    /// next call can proceed (how much gets discarded depends on the decoder's
    /// malformed-word policy). Missing streams and I/O failures cannot be continued.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CodecError::UnexpectedWord { .. }
                | CodecError::ParameterOutOfRange(_)
                | CodecError::ValueOutOfRange { .. }
        )
    }
}

/// Returned by [`RingBuffer::put`](crate::data::ring_buffer::RingBuffer::put) when
/// every slot holds an unread buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Ring buffer full ({capacity} unread buffers), could lose buffer")]
pub struct RingFull {
    /// Number of slots in the ring.
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_word_reports_word_and_position() {
        let err = CodecError::UnexpectedWord {
            word: 0x0200_1234,
            position: 128,
            expected: "parameter or end-of-block",
        };
        let message = err.to_string();
        assert!(message.contains("0x02001234"));
        assert!(message.contains("byte 128"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_io_errors_are_not_recoverable() {
        let err = CodecError::from(io::Error::new(io::ErrorKind::Other, "disk gone"));
        assert!(!err.is_recoverable());
        assert!(!CodecError::NoInput.is_recoverable());
    }

    #[test]
    fn test_ring_full_converts_into_sort_error() {
        let err: SortError = RingFull { capacity: 64 }.into();
        match err {
            SortError::RingFull(full) => assert_eq!(full.capacity, 64),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
