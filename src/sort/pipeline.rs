//! Pipeline contexts.
//!
//! A pipeline is built once from a [`SortConfig`] and owns everything a run
//! needs: codec, sorter, scaler sink, controller, counters and (online) the ring
//! buffer. It spawns the daemon threads and hands back a handle to steer them.
//! Nothing is looked up globally.

use super::acquisition::AcquisitionDaemon;
use super::controller::{OfflineController, OnlineController};
use super::counters::{CounterSnapshot, SortCounters};
use super::sort_daemon::{SortDaemon, SortParts};
use super::sorter::{ScalerSink, Sorter};
use super::state::{StateHandle, ThreadState};
use super::storage::{OutputStorage, StorageDaemon};
use crate::config::{OfflineConfig, SortConfig};
use crate::data::ring_buffer::RingBuffer;
use crate::error::{AppResult, SortError};
use parking_lot::Mutex;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

/// Name of the decode/dispatch thread.
pub const SORT_THREAD: &str = "sort-daemon";
/// Name of the front-end reader thread.
pub const ACQUISITION_THREAD: &str = "acquisition-daemon";

fn spawn_named<T, F>(name: &str, f: F) -> AppResult<JoinHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| SortError::Spawn {
            name: name.to_string(),
            source,
        })
}

fn join_named<T>(name: &str, handle: JoinHandle<T>) -> AppResult<T> {
    handle
        .join()
        .map_err(|_| SortError::ThreadPanicked(name.to_string()))
}

/// Build the file list described by the `offline` section.
pub fn storage_from_config(offline: &OfflineConfig) -> AppResult<StorageDaemon> {
    let mut storage = StorageDaemon::new();
    storage.set_event_input_list(offline.files.iter().cloned());
    if let Some(list) = &offline.list {
        storage.load_list(list)?;
    }
    for dir in &offline.directories {
        storage.add_directory(dir)?;
    }
    Ok(storage)
}

/// Offline replay: event files decoded on one daemon thread.
pub struct SortPipeline<S, K> {
    controller: OfflineController,
    counters: Arc<SortCounters>,
    output_path: Option<PathBuf>,
    thread: Option<JoinHandle<SortParts<S, K>>>,
}

impl<S, K> SortPipeline<S, K>
where
    S: Sorter + 'static,
    K: ScalerSink + 'static,
{
    /// Spawn a suspended daemon replaying the files named by `config`.
    pub fn offline(config: &SortConfig, sorter: S, scalers: K) -> AppResult<Self> {
        let storage = storage_from_config(&config.offline)?;
        Self::with_storage(config, storage, sorter, scalers)
    }

    /// Spawn a suspended daemon replaying `storage`. Fails on an invalid
    /// configuration before any thread is started.
    pub fn with_storage(
        config: &SortConfig,
        storage: StorageDaemon,
        sorter: S,
        scalers: K,
    ) -> AppResult<Self> {
        config.validate()?;
        let settings = config.sort.input_codec();
        let output = Arc::new(Mutex::new(OutputStorage::new(
            config.sort.output_format().codec(&settings),
            config.offline.output_header(settings.event_size),
        )));
        let state = StateHandle::default();
        let counters = Arc::new(SortCounters::new());
        let controller = OfflineController::new(storage, Arc::clone(&output), state.clone());

        let mut daemon = SortDaemon::new(
            config.sort.input_format.codec(&settings),
            sorter,
            scalers,
            Box::new(controller.clone()),
            state,
            Arc::clone(&counters),
        )
        .with_output(output)
        .with_events_per_poll(config.sort.events_per_poll);
        daemon.at_sort_start();

        let thread = spawn_named(SORT_THREAD, move || daemon.run_offline())?;

        Ok(Self {
            controller,
            counters,
            output_path: config.offline.output.clone(),
            thread: Some(thread),
        })
    }

    /// Controller for the file list and sort lifecycle.
    pub fn controller(&self) -> &OfflineController {
        &self.controller
    }

    /// Start replaying from the first file, writing the configured output file.
    pub fn begin_sort(&self) -> AppResult<()> {
        self.controller.begin_sort(self.output_path.as_deref())
    }

    /// Block until the replay finishes, up to `timeout`.
    pub fn wait_for_sort_end(&self, timeout: Duration) -> bool {
        self.controller.wait_for_sort_end(timeout)
    }

    /// Park the daemon at its next poll point.
    pub fn suspend(&self) -> AppResult<()> {
        self.controller.state().suspend()
    }

    /// Resume a suspended daemon.
    pub fn resume(&self) -> AppResult<()> {
        self.controller.state().begin()
    }

    /// Stop the daemon for good.
    pub fn cancel(&self) {
        self.controller.cancel_offline_sorting();
    }

    /// Current daemon state.
    pub fn state(&self) -> ThreadState {
        self.controller.state().get()
    }

    /// Current counters.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Stop the daemon and wait for it to exit, returning its collaborators.
    pub fn join(mut self) -> AppResult<SortParts<S, K>> {
        self.controller.state().stop();
        let handle = self
            .thread
            .take()
            .ok_or_else(|| SortError::ThreadPanicked(SORT_THREAD.to_string()))?;
        join_named(SORT_THREAD, handle)
    }
}

impl<S, K> Drop for SortPipeline<S, K> {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.controller.state().stop();
            if handle.join().is_err() {
                warn!("{SORT_THREAD} thread panicked");
            }
        }
    }
}

/// Online sorting: an acquisition thread fills the ring, a sort thread drains it.
pub struct OnlinePipeline<S, K> {
    ring: Arc<RingBuffer>,
    sort_state: StateHandle,
    acquisition_state: StateHandle,
    controller: OnlineController,
    counters: Arc<SortCounters>,
    sort_thread: Option<JoinHandle<SortParts<S, K>>>,
    acquisition_thread: Option<JoinHandle<AppResult<()>>>,
}

impl<S, K> OnlinePipeline<S, K>
where
    S: Sorter + 'static,
    K: ScalerSink + 'static,
{
    /// Spawn suspended acquisition and sort daemons reading buffers from `source`.
    pub fn start<R>(config: &SortConfig, source: R, sorter: S, scalers: K) -> AppResult<Self>
    where
        R: Read + Send + 'static,
    {
        config.validate()?;
        let ring = Arc::new(
            RingBuffer::with_capacity(config.ring.capacity)
                .with_poll_interval(config.ring.poll_interval),
        );
        let counters = Arc::new(SortCounters::new());
        let poll_interval = config.ring.poll_interval;

        let acquisition_state = StateHandle::default();
        let mut acquisition = AcquisitionDaemon::new(
            source,
            Arc::clone(&ring),
            acquisition_state.clone(),
            Arc::clone(&counters),
        )
        .with_policy(config.ring.overflow)
        .with_stall_interval(poll_interval);
        if let Some(path) = &config.online.archive {
            acquisition = acquisition.with_archive(path)?;
        }

        let sort_state = StateHandle::default();
        let controller = OnlineController::new(sort_state.clone());
        let mut daemon = SortDaemon::new(
            config.sort.input_format.codec(&config.sort.input_codec()),
            sorter,
            scalers,
            Box::new(controller.clone()),
            sort_state.clone(),
            Arc::clone(&counters),
        );
        daemon.at_sort_start();

        let sort_ring = Arc::clone(&ring);
        let sort_thread =
            spawn_named(SORT_THREAD, move || daemon.run_online(&sort_ring, poll_interval))?;
        let acquisition_thread = match spawn_named(ACQUISITION_THREAD, move || acquisition.run()) {
            Ok(handle) => handle,
            Err(err) => {
                sort_state.stop();
                join_named(SORT_THREAD, sort_thread)?;
                return Err(err);
            }
        };

        Ok(Self {
            ring,
            sort_state,
            acquisition_state,
            controller,
            counters,
            sort_thread: Some(sort_thread),
            acquisition_thread: Some(acquisition_thread),
        })
    }

    /// Start (or resume) acquisition and sorting.
    pub fn begin(&self) -> AppResult<()> {
        self.sort_state.begin()?;
        self.acquisition_state.begin()
    }

    /// Park both daemons at their next poll point. Buffers already in the ring
    /// stay there.
    pub fn suspend(&self) -> AppResult<()> {
        self.acquisition_state.suspend()?;
        self.sort_state.suspend()
    }

    /// Stop both daemons for good.
    pub fn stop(&self) {
        self.acquisition_state.stop();
        self.sort_state.stop();
    }

    /// State of the sort daemon.
    pub fn state(&self) -> ThreadState {
        self.sort_state.get()
    }

    /// Current counters.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// The shared ring buffer.
    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    /// Number of end-of-run markers sorted.
    pub fn runs_ended(&self) -> u64 {
        self.controller.runs_ended()
    }

    /// Wait until the sort daemon suspends itself at the end of a run.
    pub fn wait_for_run_end(&self, timeout: Duration) -> bool {
        self.sort_state.wait_for(ThreadState::Suspend, timeout)
    }

    /// Wait until the source is exhausted and every received buffer has been
    /// sorted or dropped.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let source_done = self
                .acquisition_thread
                .as_ref()
                .map_or(true, JoinHandle::is_finished);
            let counters = self.counters.snapshot();
            if source_done
                && counters.buffers_sorted + counters.buffers_dropped >= counters.buffers_received
            {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Stop both daemons and wait for them to exit.
    pub fn join(mut self) -> AppResult<SortParts<S, K>> {
        self.stop();
        let acquisition = match self.acquisition_thread.take() {
            Some(handle) => join_named(ACQUISITION_THREAD, handle)?,
            None => Ok(()),
        };
        let handle = self
            .sort_thread
            .take()
            .ok_or_else(|| SortError::ThreadPanicked(SORT_THREAD.to_string()))?;
        let parts = join_named(SORT_THREAD, handle)?;
        acquisition?;
        Ok(parts)
    }
}

impl<S, K> Drop for OnlinePipeline<S, K> {
    fn drop(&mut self) {
        self.acquisition_state.stop();
        self.sort_state.stop();
        if let Some(handle) = self.acquisition_thread.take() {
            if handle.join().is_err() {
                warn!("{ACQUISITION_THREAD} thread panicked");
            }
        }
        if let Some(handle) = self.sort_thread.take() {
            if handle.join().is_err() {
                warn!("{SORT_THREAD} thread panicked");
            }
        }
    }
}
