//! Daemon thread state.
//!
//! Sort and acquisition daemons poll a shared [`StateHandle`] at the top of every
//! loop iteration, after the current buffer has been decoded and never in the
//! middle of an event. A control thread (CLI, script, test) flips the state; the
//! daemon parks on a condition variable while suspended, so suspension costs no
//! CPU and is woken immediately by `begin` or `stop`.
//!
//! # State Machine
//!
//! ```text
//!            begin
//! Suspend ─────────> Run
//!    ▲               │
//!    └───────────────┘
//!         suspend
//!
//! Run | Suspend ──stop──> Stop   (terminal)
//! ```

use crate::error::{AppResult, SortError};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle state of a daemon thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Taking and decoding input
    Run,
    /// Parked at the poll point; pending reassembly state is kept
    Suspend,
    /// Closing input and output, then exiting
    Stop,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadState::Run => write!(f, "RUN"),
            ThreadState::Suspend => write!(f, "SUSPEND"),
            ThreadState::Stop => write!(f, "STOP"),
        }
    }
}

impl ThreadState {
    /// Check if the state allows (re)starting intake.
    pub fn can_begin(&self) -> bool {
        matches!(self, ThreadState::Suspend | ThreadState::Run)
    }

    /// Check if the state allows suspending.
    pub fn can_suspend(&self) -> bool {
        matches!(self, ThreadState::Run | ThreadState::Suspend)
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ThreadState::Stop)
    }
}

struct Shared {
    state: Mutex<ThreadState>,
    changed: Condvar,
}

/// Cloneable handle to one daemon's state.
#[derive(Clone)]
pub struct StateHandle {
    shared: Arc<Shared>,
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new(ThreadState::Suspend)
    }
}

impl fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateHandle").field(&self.get()).finish()
    }
}

impl StateHandle {
    /// Handle starting in `initial`.
    pub fn new(initial: ThreadState) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(initial),
                changed: Condvar::new(),
            }),
        }
    }

    /// Current state.
    pub fn get(&self) -> ThreadState {
        *self.shared.state.lock()
    }

    /// `SUSPEND -> RUN`.
    ///
    /// # Errors
    ///
    /// Returns [`SortError::Stopped`] once the daemon has been stopped.
    pub fn begin(&self) -> AppResult<()> {
        self.transition(ThreadState::Run)
    }

    /// `RUN -> SUSPEND`.
    ///
    /// # Errors
    ///
    /// Returns [`SortError::Stopped`] once the daemon has been stopped.
    pub fn suspend(&self) -> AppResult<()> {
        self.transition(ThreadState::Suspend)
    }

    /// Any state `-> STOP`. Irreversible.
    pub fn stop(&self) {
        *self.shared.state.lock() = ThreadState::Stop;
        self.shared.changed.notify_all();
    }

    /// True once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.get().is_terminal()
    }

    fn transition(&self, next: ThreadState) -> AppResult<()> {
        let mut state = self.shared.state.lock();
        if state.is_terminal() {
            return Err(SortError::Stopped);
        }
        *state = next;
        drop(state);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Park while suspended. Returns [`ThreadState::Run`] or [`ThreadState::Stop`].
    pub fn wait_while_suspended(&self) -> ThreadState {
        let mut state = self.shared.state.lock();
        while *state == ThreadState::Suspend {
            self.shared.changed.wait(&mut state);
        }
        *state
    }

    /// Wait until the state equals `target`, up to `timeout`.
    pub fn wait_for(&self, target: ThreadState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while *state != target {
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return *state == target;
            }
        }
        true
    }
}
