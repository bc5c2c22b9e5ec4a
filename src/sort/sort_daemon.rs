//! Decode/dispatch daemon.
//!
//! The daemon owns the input codec, the sorter and the scaler sink. Each loop
//! iteration first polls the [`StateHandle`], then decodes input until a control
//! status (or `events_per_poll` reads, offline) and hands every complete event to
//! the sorter. State changes therefore only take effect between iterations, never
//! halfway through an event, and reassembly state held by the codec survives a
//! suspend.
//!
//! Offline, input comes from files handed over by the [`Controller`]; `END_FILE`
//! and `END_RUN` both move on to the next file, and when none is left the daemon
//! suspends and reports `at_sort_end`. Online, input comes from the ring buffer
//! one buffer at a time; `END_RUN` suspends the daemon.

use super::controller::Controller;
use super::counters::SortCounters;
use super::sorter::{ScalerSink, Sorter};
use super::state::{StateHandle, ThreadState};
use super::storage::OutputStorage;
use crate::data::ring_buffer::RingBuffer;
use crate::stream::{EventCodec, EventInputStatus};
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default number of decode calls per offline iteration.
pub const DEFAULT_EVENTS_PER_POLL: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    EndOfInput,
    EndOfRun,
}

/// Collaborators handed back when the daemon exits.
pub struct SortParts<S, K> {
    /// The event sorter
    pub sorter: S,
    /// The scaler collaborator
    pub scalers: K,
}

/// Single-threaded decode loop.
pub struct SortDaemon<S, K> {
    codec: Box<dyn EventCodec>,
    sorter: S,
    scalers: K,
    controller: Box<dyn Controller>,
    output: Option<Arc<Mutex<OutputStorage>>>,
    state: StateHandle,
    counters: Arc<SortCounters>,
    event: Vec<i32>,
    events_per_poll: usize,
}

impl<S: Sorter, K: ScalerSink> SortDaemon<S, K> {
    /// Daemon decoding with `codec` and dispatching to `sorter` and `scalers`.
    pub fn new(
        codec: Box<dyn EventCodec>,
        sorter: S,
        scalers: K,
        controller: Box<dyn Controller>,
        state: StateHandle,
        counters: Arc<SortCounters>,
    ) -> Self {
        let event = vec![0; codec.event_size()];
        Self {
            codec,
            sorter,
            scalers,
            controller,
            output: None,
            state,
            counters,
            event,
            events_per_poll: DEFAULT_EVENTS_PER_POLL,
        }
    }

    /// Also write every sorted event to `output` while it is enabled.
    #[must_use]
    pub fn with_output(mut self, output: Arc<Mutex<OutputStorage>>) -> Self {
        self.output = Some(output);
        self
    }

    /// Decode calls per offline iteration, at least 1.
    #[must_use]
    pub fn with_events_per_poll(mut self, events_per_poll: usize) -> Self {
        self.events_per_poll = events_per_poll.max(1);
        self
    }

    /// Let the controller prepare; by convention it parks the daemon.
    pub fn at_sort_start(&mut self) {
        self.controller.at_sort_start();
    }

    /// Replay files until stopped.
    pub fn run_offline(mut self) -> SortParts<S, K> {
        info!(format = %self.codec.format(), "Offline sort daemon started");
        let mut have_input = false;

        while self.state.wait_while_suspended() == ThreadState::Run {
            if !have_input {
                have_input = self.open_next_input();
                if !have_input {
                    info!(counters = %self.counters.snapshot(), "No more event files");
                    // Events still waiting for blocks are dropped; the next sort
                    // starts with an empty reassembly window.
                    let pending = self.codec.pending_events();
                    if pending > 0 {
                        warn!(pending, "Dropping incomplete events at end of sort");
                    }
                    self.codec.reset();
                    // Suspend before reporting so a begin issued from the
                    // callback's waiter is not overwritten.
                    if self.state.suspend().is_err() {
                        debug!("Daemon stopped at end of sort");
                    }
                    self.controller.at_sort_end();
                    continue;
                }
            }

            if self.sort_iteration() != Flow::Continue {
                self.counters.file_sorted();
                have_input = false;
            }
        }

        self.shutdown()
    }

    /// Sort buffers from `ring` until stopped. A blocked wait on the ring re-checks
    /// the state every `poll_interval`.
    pub fn run_online(mut self, ring: &RingBuffer, poll_interval: Duration) -> SortParts<S, K> {
        info!(format = %self.codec.format(), "Online sort daemon started");

        while self.state.wait_while_suspended() == ThreadState::Run {
            let Some(buffer) = ring.get_timeout(poll_interval) else {
                continue;
            };
            if self.sort_buffer(buffer) == Flow::EndOfRun {
                if self.state.suspend().is_err() {
                    debug!("Daemon stopped at end of run");
                }
                self.controller.at_sort_end();
            }
        }

        self.shutdown()
    }

    /// Close the previous file, then open files until one has a readable header.
    fn open_next_input(&mut self) -> bool {
        self.codec.close_input();
        while self.controller.open_next_file() {
            let Some(input) = self.controller.take_input() else {
                continue;
            };
            self.codec.set_input(input);
            match self.codec.read_header() {
                Ok(()) => {
                    if let Some(header) = self.codec.header() {
                        info!(
                            title = %header.title,
                            run = header.run_number,
                            event_size = header.event_size,
                            "Read run header"
                        );
                        if let Some(output) = &self.output {
                            output.lock().write_header(header);
                        }
                    }
                    return true;
                }
                Err(err) => {
                    self.counters.decode_error();
                    error!(error = %err, "Could not read event file header, skipping file");
                    self.codec.close_input();
                }
            }
        }
        false
    }

    fn sort_iteration(&mut self) -> Flow {
        for _ in 0..self.events_per_poll {
            let Some(status) = self.next_status() else {
                return Flow::EndOfInput;
            };
            match status {
                EventInputStatus::Event => self.dispatch_event(),
                EventInputStatus::ScalerValue => self.dispatch_scalers(),
                EventInputStatus::EndBuffer => {
                    self.counters.buffer_sorted();
                    return Flow::Continue;
                }
                EventInputStatus::EndFile => return Flow::EndOfInput,
                EventInputStatus::EndRun => {
                    info!("End of run marker in event file");
                    return Flow::EndOfRun;
                }
                EventInputStatus::PartialEvent
                | EventInputStatus::Ignore
                | EventInputStatus::UnknownWord => {}
            }
        }
        Flow::Continue
    }

    fn sort_buffer(&mut self, buffer: Bytes) -> Flow {
        self.codec.set_input(Box::new(buffer.reader()));
        let flow = loop {
            let Some(status) = self.next_status() else {
                break Flow::Continue;
            };
            match status {
                EventInputStatus::Event => self.dispatch_event(),
                EventInputStatus::ScalerValue => self.dispatch_scalers(),
                EventInputStatus::EndBuffer | EventInputStatus::EndFile => break Flow::Continue,
                EventInputStatus::EndRun => break Flow::EndOfRun,
                EventInputStatus::PartialEvent
                | EventInputStatus::Ignore
                | EventInputStatus::UnknownWord => {}
            }
        };
        self.codec.close_input();
        self.counters.buffer_sorted();
        flow
    }

    /// Decode once. Malformed words are logged and reported as `Ignore`; `None`
    /// means the input cannot be read any further.
    fn next_status(&mut self) -> Option<EventInputStatus> {
        match self.codec.read_event(&mut self.event) {
            Ok(status) => Some(status),
            Err(err) if err.is_recoverable() => {
                self.counters.decode_error();
                warn!(error = %err, "Malformed event data");
                self.event.fill(0);
                Some(EventInputStatus::Ignore)
            }
            Err(err) => {
                self.counters.decode_error();
                error!(error = %err, "Could not read event input");
                None
            }
        }
    }

    fn dispatch_event(&mut self) {
        if let Err(err) = self.sorter.sort(&self.event) {
            self.counters.sorter_error();
            warn!(error = %err, "Sorter failed on event");
        }
        self.counters.event_sorted();
        if let Some(output) = &self.output {
            if output.lock().write_event(&self.event) {
                self.counters.event_written();
            }
        }
        self.event.fill(0);
    }

    fn dispatch_scalers(&mut self) {
        self.scalers.record(self.codec.scaler_values());
        self.counters.scaler_block();
    }

    fn shutdown(mut self) -> SortParts<S, K> {
        self.codec.close_input();
        if let Some(output) = &self.output {
            if output.lock().close() {
                self.controller.at_write_end();
            }
        }
        info!(counters = %self.counters.snapshot(), "Sort daemon stopped");
        SortParts {
            sorter: self.sorter,
            scalers: self.scalers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::controller::OnlineController;
    use crate::sort::sorter::{ParameterTally, ScalerTotals};
    use crate::stream::caen::{self, CaenCodec};
    use crate::data::ring_buffer::BUFFER_SIZE;
    use std::thread;

    fn caen_buffer(words: &[u32]) -> Box<[u8; BUFFER_SIZE]> {
        let mut buffer = Box::new([0u8; BUFFER_SIZE]);
        let mut offset = 0;
        for word in words.iter().copied().chain(std::iter::once(caen::BUFFER_END)) {
            buffer[offset..offset + 4].copy_from_slice(&word.to_be_bytes());
            offset += 4;
        }
        while offset + 4 <= BUFFER_SIZE {
            buffer[offset..offset + 4].copy_from_slice(&caen::BUFFER_PAD.to_be_bytes());
            offset += 4;
        }
        buffer
    }

    fn one_module_event(counter: u32, value: u32) -> Vec<u32> {
        vec![
            caen::HEADER_TYPE | (1 << 8),
            value,
            caen::END_OF_BLOCK_TYPE | counter,
        ]
    }

    #[test]
    fn test_online_daemon_sorts_ring_buffers_until_end_run() {
        let ring = Arc::new(RingBuffer::with_capacity(4));
        let state = StateHandle::default();
        let counters = Arc::new(SortCounters::new());
        let controller = OnlineController::new(state.clone());

        let mut daemon = SortDaemon::new(
            Box::new(CaenCodec::new(8)),
            ParameterTally::new(8),
            ScalerTotals::new(),
            Box::new(controller.clone()),
            state.clone(),
            Arc::clone(&counters),
        );
        daemon.at_sort_start();

        let mut first = one_module_event(1, 10);
        first.extend(one_module_event(2, 20));
        first.extend([caen::SCALER_BLOCK, 1, 99]);
        ring.put(&caen_buffer(&first)).unwrap();
        let mut second = one_module_event(3, 30);
        second.push(caen::END_PAD);
        ring.put(&caen_buffer(&second)).unwrap();

        let daemon_ring = Arc::clone(&ring);
        let worker = thread::spawn(move || {
            daemon.run_online(&daemon_ring, Duration::from_millis(10))
        });

        state.begin().unwrap();
        assert!(controller_waits_for_run_end(&controller));
        state.stop();
        let parts = worker.join().unwrap();

        assert_eq!(parts.sorter.events(), 3);
        assert_eq!(parts.sorter.hits()[0], 3);
        assert_eq!(parts.scalers.latest(), &[99]);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.events_sorted, 3);
        assert_eq!(snapshot.buffers_sorted, 2);
        assert_eq!(snapshot.scaler_blocks, 1);
    }

    fn controller_waits_for_run_end(controller: &OnlineController) -> bool {
        for _ in 0..500 {
            if controller.runs_ended() == 1 {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }
}
