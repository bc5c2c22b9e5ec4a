//! Fixed-capacity ring of fixed-size event buffers.
//!
//! The ring is the only structure shared between the acquisition thread, which
//! `put`s raw buffers as they arrive from the front end, and the sort daemon, which
//! `get`s them back in arrival order. Every buffer is copied into ring-owned storage
//! on `put` and copied out again on `get`, so no memory is aliased across threads.
//!
//! # Full and empty
//!
//! Cursors are indices modulo the capacity. Equal cursors are ambiguous on their
//! own, so the ring also remembers which cursor moved last:
//!
//! ```text
//! put == get, last op was put  -> full   (put fails with RingFull)
//! put == get, last op was get  -> empty  (get waits)
//! ```
//!
//! # Thread Safety
//!
//! All state sits behind a single mutex. A waiting `get` parks on a condition
//! variable that `put` signals, and additionally re-checks every poll interval
//! (one second by default).

use crate::error::RingFull;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Size in bytes of a single buffer.
pub const BUFFER_SIZE: usize = 8 * 1024;

/// Number of buffers in a default ring.
pub const DEFAULT_CAPACITY: usize = 64;

/// How often a blocked `get` re-checks the ring on its own.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One fixed-size buffer as produced by the acquisition hardware.
pub type Buffer = [u8; BUFFER_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastOp {
    Put,
    Get,
}

struct RingState {
    slots: Vec<Box<Buffer>>,
    /// Slot the next `put` writes
    put: usize,
    /// Slot the next `get` reads
    get: usize,
    last: LastOp,
}

impl RingState {
    fn is_full(&self) -> bool {
        self.put == self.get && self.last == LastOp::Put
    }

    fn is_empty(&self) -> bool {
        self.put == self.get && self.last == LastOp::Get
    }

    fn len(&self) -> usize {
        let capacity = self.slots.len();
        if self.is_full() {
            capacity
        } else {
            (self.put + capacity - self.get) % capacity
        }
    }

    fn take(&mut self) -> Bytes {
        let buffer = Bytes::copy_from_slice(&self.slots[self.get][..]);
        self.get = (self.get + 1) % self.slots.len();
        self.last = LastOp::Get;
        buffer
    }
}

/// Circular queue of [`BUFFER_SIZE`]-byte buffers.
///
/// # Example
/// ```
/// use rust_sort::data::ring_buffer::{RingBuffer, BUFFER_SIZE};
///
/// let ring = RingBuffer::with_capacity(4);
/// ring.put(&[7u8; BUFFER_SIZE]).unwrap();
/// assert_eq!(ring.get()[0], 7);
/// assert!(ring.is_empty());
/// ```
pub struct RingBuffer {
    state: Mutex<RingState>,
    available: Condvar,
    capacity: usize,
    poll_interval: Duration,
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RingBuffer {
    /// Create a ring with [`DEFAULT_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a ring with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be > 0");

        let slots = (0..capacity).map(|_| Box::new([0u8; BUFFER_SIZE])).collect();

        Self {
            state: Mutex::new(RingState {
                slots,
                put: 0,
                get: 0,
                last: LastOp::Get,
            }),
            available: Condvar::new(),
            capacity,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override how often a blocked `get` re-checks the ring.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Copy `buffer` into the next free slot.
    ///
    /// Fails with [`RingFull`] when every slot holds an unread buffer; nothing is
    /// overwritten. Whether to drop the buffer or retry is up to the caller.
    pub fn put(&self, buffer: &Buffer) -> Result<(), RingFull> {
        let mut state = self.state.lock();
        if state.is_full() {
            return Err(RingFull {
                capacity: self.capacity,
            });
        }

        let slot = state.put;
        state.slots[slot].copy_from_slice(buffer);
        state.put = (slot + 1) % self.capacity;
        state.last = LastOp::Put;
        drop(state);

        self.available.notify_all();
        Ok(())
    }

    /// Remove and return the oldest unread buffer, waiting for one if necessary.
    pub fn get(&self) -> Bytes {
        let mut state = self.state.lock();
        while state.is_empty() {
            self.available.wait_for(&mut state, self.poll_interval);
        }
        state.take()
    }

    /// Like [`get`](Self::get) but gives up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = (deadline - now).min(self.poll_interval);
            self.available.wait_for(&mut state, wait);
        }
        Some(state.take())
    }

    /// Remove the oldest unread buffer without waiting.
    pub fn try_get(&self) -> Option<Bytes> {
        let mut state = self.state.lock();
        if state.is_empty() {
            None
        } else {
            Some(state.take())
        }
    }

    /// True if there are no unread buffers.
    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    /// True if a `put` would fail.
    pub fn is_full(&self) -> bool {
        self.state.lock().is_full()
    }

    /// Number of unread buffers.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard every unread buffer.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.get = state.put;
        state.last = LastOp::Get;
    }
}
