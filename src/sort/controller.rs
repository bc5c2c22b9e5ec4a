//! Callbacks between the sort daemon and whatever drives it.
//!
//! The daemon owns a boxed [`Controller`] and calls it from its own thread. The
//! offline controller is also held by the control thread (through a clone) to
//! start, cancel and wait for a replay, so its state sits behind a mutex.

use super::state::StateHandle;
use super::storage::{OutputStorage, StorageDaemon};
use crate::error::{AppResult, SortError};
use parking_lot::{Condvar, Mutex};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Narrow interface the sort daemon uses to report progress and obtain input.
pub trait Controller: Send {
    /// Called once before the first buffer. Parks the daemon in `SUSPEND` until it
    /// is explicitly begun.
    fn at_sort_start(&mut self);

    /// Open the next input file. True if one was opened.
    fn open_next_file(&mut self) -> bool;

    /// Stream opened by the last successful [`open_next_file`](Self::open_next_file).
    fn take_input(&mut self) -> Option<Box<dyn Read + Send>>;

    /// All files exhausted, or an end-of-run marker was seen.
    fn at_sort_end(&mut self);

    /// The output file was closed.
    fn at_write_end(&mut self);
}

struct Session {
    storage: StorageDaemon,
    sorting: bool,
    sorts_finished: u64,
}

/// Drives offline replay of a list of event files.
#[derive(Clone)]
pub struct OfflineController {
    session: Arc<Mutex<Session>>,
    finished: Arc<Condvar>,
    output: Arc<Mutex<OutputStorage>>,
    state: StateHandle,
}

impl OfflineController {
    /// Controller over `storage`, writing pre-sorted events through `output` and
    /// steering the daemon through `state`.
    pub fn new(
        storage: StorageDaemon,
        output: Arc<Mutex<OutputStorage>>,
        state: StateHandle,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session {
                storage,
                sorting: false,
                sorts_finished: 0,
            })),
            finished: Arc::new(Condvar::new()),
            output,
            state,
        }
    }

    /// Run `f` on the file list.
    pub fn with_storage<R>(&self, f: impl FnOnce(&mut StorageDaemon) -> R) -> R {
        f(&mut self.session.lock().storage)
    }

    /// Shared output storage.
    pub fn output(&self) -> &Arc<Mutex<OutputStorage>> {
        &self.output
    }

    /// Daemon state this controller steers.
    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    /// Whether a replay is in progress.
    pub fn is_sorting(&self) -> bool {
        self.session.lock().sorting
    }

    /// Number of replays that ran to the end of their file list.
    pub fn sorts_finished(&self) -> u64 {
        self.session.lock().sorts_finished
    }

    /// Start replaying the file list from the first file, optionally writing
    /// pre-sorted events to `output`.
    ///
    /// # Errors
    ///
    /// Fails if the list is empty, a replay is already running, or the daemon
    /// has been stopped.
    pub fn begin_sort(&self, output: Option<&Path>) -> AppResult<()> {
        {
            let mut session = self.session.lock();
            if session.sorting {
                return Err(SortError::Configuration(
                    "an offline sort is already running".to_string(),
                ));
            }
            if session.storage.files().is_empty() {
                return Err(SortError::Configuration(
                    "no event files to sort".to_string(),
                ));
            }
            if self.state.is_stopped() {
                return Err(SortError::Stopped);
            }
            session.storage.rewind();
            session.sorting = true;
            info!(files = session.storage.files().len(), "Starting offline sort");
        }

        if let Some(path) = output {
            self.output.lock().open_output(path);
        }
        self.state.begin()
    }

    /// Request `STOP`. The buffer being decoded is not guaranteed to finish.
    pub fn cancel_offline_sorting(&self) {
        info!("Cancelling offline sort");
        self.state.stop();
        self.session.lock().sorting = false;
        self.finished.notify_all();
    }

    /// Block until the current replay finishes or is cancelled, up to `timeout`.
    /// Returns false on timeout.
    pub fn wait_for_sort_end(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut session = self.session.lock();
        while session.sorting {
            if self.finished.wait_until(&mut session, deadline).timed_out() {
                return !session.sorting;
            }
        }
        true
    }
}

impl Controller for OfflineController {
    fn at_sort_start(&mut self) {
        if self.state.suspend().is_err() {
            warn!("Sort daemon stopped before it started");
        }
        debug!("Sort daemon waiting for begin");
    }

    fn open_next_file(&mut self) -> bool {
        self.session.lock().storage.open_next()
    }

    fn take_input(&mut self) -> Option<Box<dyn Read + Send>> {
        self.session.lock().storage.take_input()
    }

    fn at_sort_end(&mut self) {
        if self.output.lock().close() {
            self.at_write_end();
        }
        {
            let mut session = self.session.lock();
            session.storage.close_input();
            session.sorting = false;
            session.sorts_finished += 1;
        }
        self.finished.notify_all();
        info!("Offline sort finished");
    }

    fn at_write_end(&mut self) {
        info!("Output event file written");
    }
}

/// Controller for live acquisition: there are no files to open, and the end of
/// a run only needs recording.
#[derive(Clone)]
pub struct OnlineController {
    state: StateHandle,
    runs_ended: Arc<AtomicU64>,
}

impl OnlineController {
    /// Controller steering the daemon through `state`.
    pub fn new(state: StateHandle) -> Self {
        Self {
            state,
            runs_ended: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of end-of-run markers seen.
    pub fn runs_ended(&self) -> u64 {
        self.runs_ended.load(Ordering::Relaxed)
    }
}

impl Controller for OnlineController {
    fn at_sort_start(&mut self) {
        if self.state.suspend().is_err() {
            warn!("Sort daemon stopped before it started");
        }
    }

    fn open_next_file(&mut self) -> bool {
        false
    }

    fn take_input(&mut self) -> Option<Box<dyn Read + Send>> {
        None
    }

    fn at_sort_end(&mut self) {
        let runs = self.runs_ended.fetch_add(1, Ordering::Relaxed) + 1;
        info!(runs, "End of run, sorting suspended");
    }

    fn at_write_end(&mut self) {
        debug!("No output file in online mode");
    }
}
