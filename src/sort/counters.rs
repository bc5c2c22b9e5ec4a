//! Pipeline counters.
//!
//! Counters are plain atomics so the daemons can bump them without locking and a
//! control thread can read them at any time.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared between daemons and observers.
#[derive(Debug, Default)]
pub struct SortCounters {
    buffers_received: AtomicU64,
    buffers_dropped: AtomicU64,
    buffers_sorted: AtomicU64,
    events_sorted: AtomicU64,
    events_written: AtomicU64,
    scaler_blocks: AtomicU64,
    decode_errors: AtomicU64,
    sorter_errors: AtomicU64,
    files_sorted: AtomicU64,
}

/// Point-in-time copy of [`SortCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Buffers taken from the front end
    pub buffers_received: u64,
    /// Buffers lost to a full ring
    pub buffers_dropped: u64,
    /// Buffers fully decoded
    pub buffers_sorted: u64,
    /// Events handed to the sorter
    pub events_sorted: u64,
    /// Events written to the output file
    pub events_written: u64,
    /// Scaler blocks forwarded
    pub scaler_blocks: u64,
    /// Malformed words, bad headers and read failures
    pub decode_errors: u64,
    /// Events the sorter rejected
    pub sorter_errors: u64,
    /// Input files finished
    pub files_sorted: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        #[doc = concat!("Increment `", stringify!($field), "`.")]
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl SortCounters {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    counter!(buffer_received, buffers_received);
    counter!(buffer_dropped, buffers_dropped);
    counter!(buffer_sorted, buffers_sorted);
    counter!(event_sorted, events_sorted);
    counter!(event_written, events_written);
    counter!(scaler_block, scaler_blocks);
    counter!(decode_error, decode_errors);
    counter!(sorter_error, sorter_errors);
    counter!(file_sorted, files_sorted);

    /// Copy every counter.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            buffers_received: self.buffers_received.load(Ordering::Relaxed),
            buffers_dropped: self.buffers_dropped.load(Ordering::Relaxed),
            buffers_sorted: self.buffers_sorted.load(Ordering::Relaxed),
            events_sorted: self.events_sorted.load(Ordering::Relaxed),
            events_written: self.events_written.load(Ordering::Relaxed),
            scaler_blocks: self.scaler_blocks.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            sorter_errors: self.sorter_errors.load(Ordering::Relaxed),
            files_sorted: self.files_sorted.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "buffers: {} received, {} dropped, {} sorted | events: {} sorted, {} written | \
             scalers: {} | errors: {} decode, {} sorter | files: {}",
            self.buffers_received,
            self.buffers_dropped,
            self.buffers_sorted,
            self.events_sorted,
            self.events_written,
            self.scaler_blocks,
            self.decode_errors,
            self.sorter_errors,
            self.files_sorted,
        )
    }
}
