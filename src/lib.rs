//! # Rust Sort Core Library
//!
//! Event sorting for nuclear physics data acquisition. Raw 8 KiB buffers arrive
//! from a front end (online) or from event files on disk (offline), are decoded
//! into fixed-width events and handed to a user-supplied sorter.
//!
//! ## Crate Structure
//!
//! - **`data`**: the bounded [`RingBuffer`](data::ring_buffer::RingBuffer) between
//!   acquisition and sorting.
//! - **`stream`**: the [`EventCodec`](stream::EventCodec) contract and its two
//!   formats, the marker-based L002 stream and the multiplexed CAEN ADC stream.
//! - **`sort`**: the sort and acquisition daemons, their `RUN | SUSPEND | STOP`
//!   state, controllers, file sequencing and the pipelines tying them together.
//! - **`config`**: Figment-based configuration (`config/sort.toml` plus
//!   `RUST_SORT_*` environment overrides).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: [`SortError`](error::SortError) and [`CodecError`](error::CodecError).

pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod sort;
pub mod stream;
