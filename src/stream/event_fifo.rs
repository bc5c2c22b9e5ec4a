//! Bounded reassembly window for multiplexed events.
//!
//! Module blocks for one trigger arrive interleaved with blocks for other
//! triggers. The FIFO holds up to `depth` partially assembled events, each tagged
//! with its 24-bit hardware event counter. New counters take the next free slot;
//! blocks for a counter already present merge into its slot. Events leave in
//! allocation order, oldest first.

use std::collections::HashMap;

/// Ring of partially assembled events keyed by event counter.
#[derive(Debug)]
pub struct EventFifo {
    slots: Vec<Vec<i32>>,
    counters: Vec<u32>,
    /// Counter to slot, for every occupied slot
    index: HashMap<u32, usize>,
    put: usize,
    get: usize,
    /// Length is kept explicitly instead of a last-operation flag
    len: usize,
}

impl EventFifo {
    /// FIFO of `depth` slots, each `width` parameters wide.
    ///
    /// # Panics
    ///
    /// Panics if `depth` is 0.
    pub fn new(depth: usize, width: usize) -> Self {
        assert!(depth > 0, "fifo depth must be > 0");
        Self {
            slots: vec![vec![0; width]; depth],
            counters: vec![0; depth],
            index: HashMap::with_capacity(depth),
            put: 0,
            get: 0,
            len: 0,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no event is pending.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when every slot holds a pending event.
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Slot holding `counter`, if it is pending.
    pub fn slot_of(&self, counter: u32) -> Option<usize> {
        self.index.get(&counter).copied()
    }

    /// Allocate a zeroed slot for `counter`. Returns `None` when full.
    pub fn insert(&mut self, counter: u32) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let slot = self.put;
        self.slots[slot].fill(0);
        self.counters[slot] = counter;
        self.index.insert(counter, slot);
        self.put = (slot + 1) % self.slots.len();
        self.len += 1;
        Some(slot)
    }

    /// Store `(parameter, value)` pairs into `slot`. Parameters wider than the
    /// slot are dropped.
    pub fn merge(&mut self, slot: usize, parameters: &[(usize, i32)]) {
        let target = &mut self.slots[slot];
        for &(parameter, value) in parameters {
            if let Some(cell) = target.get_mut(parameter) {
                *cell = value;
            }
        }
    }

    /// Copy the oldest event into `out` and free its slot.
    pub fn pop_oldest(&mut self, out: &mut [i32]) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        let slot = self.get;
        let width = out.len().min(self.slots[slot].len());
        out[..width].copy_from_slice(&self.slots[slot][..width]);
        let counter = self.counters[slot];
        self.index.remove(&counter);
        self.get = (slot + 1) % self.slots.len();
        self.len -= 1;
        Some(counter)
    }

    /// Discard every pending event.
    pub fn clear(&mut self) {
        self.index.clear();
        self.put = 0;
        self.get = 0;
        self.len = 0;
    }
}
