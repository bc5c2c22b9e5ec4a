//! Daemons, controllers and the pipelines that wire them together.
//!
//! - [`state`]: `RUN | SUSPEND | STOP` shared between a daemon and its controller.
//! - [`sort_daemon`]: the decode/dispatch loop, offline (files) or online (ring).
//! - [`acquisition`]: front end to ring buffer.
//! - [`controller`]: callbacks the sort daemon makes, offline and online.
//! - [`storage`]: input file sequencing and the pre-sort output file.
//! - [`pipeline`]: builds and owns all of the above for one run.

pub mod acquisition;
pub mod controller;
pub mod counters;
pub mod pipeline;
pub mod sort_daemon;
pub mod sorter;
pub mod state;
pub mod storage;

pub use controller::{Controller, OfflineController, OnlineController};
pub use counters::{CounterSnapshot, SortCounters};
pub use pipeline::{OnlinePipeline, SortPipeline};
pub use sort_daemon::{SortDaemon, SortParts};
pub use sorter::{ParameterTally, ScalerSink, ScalerTotals, Sorter};
pub use state::{StateHandle, ThreadState};
