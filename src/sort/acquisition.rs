//! Acquisition daemon: front end to ring buffer.
//!
//! Reads fixed-size buffers from a byte source (a TCP connection to the front
//! end, or a raw buffer file being replayed), optionally archives each buffer to
//! disk, and puts it into the shared [`RingBuffer`]. What happens when the ring is
//! full is decided by [`OverflowPolicy`].

use super::counters::SortCounters;
use super::state::{StateHandle, ThreadState};
use crate::data::ring_buffer::{Buffer, RingBuffer, BUFFER_SIZE, DEFAULT_POLL_INTERVAL};
use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// What to do with a buffer that arrives while the ring is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the incoming buffer and count it.
    #[default]
    DropNewest,
    /// Hold the incoming buffer and retry until there is room.
    Stall,
}

/// Producer side of the online pipeline.
pub struct AcquisitionDaemon<R> {
    source: R,
    ring: Arc<RingBuffer>,
    archive: Option<BufWriter<File>>,
    policy: OverflowPolicy,
    stall_interval: Duration,
    state: StateHandle,
    counters: Arc<SortCounters>,
}

impl<R: Read + Send> AcquisitionDaemon<R> {
    /// Daemon reading `source` into `ring`.
    pub fn new(
        source: R,
        ring: Arc<RingBuffer>,
        state: StateHandle,
        counters: Arc<SortCounters>,
    ) -> Self {
        Self {
            source,
            ring,
            archive: None,
            policy: OverflowPolicy::default(),
            stall_interval: DEFAULT_POLL_INTERVAL,
            state,
            counters,
        }
    }

    /// Set the overflow policy.
    #[must_use]
    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// How long a stalled put waits before retrying.
    #[must_use]
    pub fn with_stall_interval(mut self, interval: Duration) -> Self {
        self.stall_interval = interval;
        self
    }

    /// Also append every received buffer to the raw file at `path`.
    pub fn with_archive(mut self, path: &Path) -> AppResult<Self> {
        let file = File::create(path)?;
        info!(file = %path.display(), "Archiving raw buffers");
        self.archive = Some(BufWriter::new(file));
        Ok(self)
    }

    /// Move buffers until the source ends or the daemon is stopped.
    pub fn run(mut self) -> AppResult<()> {
        let mut buffer: Box<Buffer> = Box::new([0u8; BUFFER_SIZE]);
        info!(capacity = self.ring.capacity(), policy = ?self.policy, "Acquisition daemon started");

        while self.state.wait_while_suspended() == ThreadState::Run {
            let filled = read_buffer(&mut self.source, &mut buffer[..])?;
            if filled == 0 {
                info!("Front end closed the stream");
                break;
            }
            if filled < BUFFER_SIZE {
                warn!(bytes = filled, "Discarding partial buffer at end of stream");
                break;
            }

            self.counters.buffer_received();
            self.archive_buffer(&buffer);
            self.deliver(&buffer);
        }

        if let Some(mut archive) = self.archive.take() {
            archive.flush()?;
        }
        info!(counters = %self.counters.snapshot(), "Acquisition daemon stopped");
        Ok(())
    }

    fn archive_buffer(&mut self, buffer: &Buffer) {
        let failed = match self.archive.as_mut() {
            Some(archive) => archive.write_all(buffer).err(),
            None => None,
        };
        if let Some(err) = failed {
            error!(error = %err, "Archive write failed, archiving disabled");
            self.archive = None;
        }
    }

    fn deliver(&self, buffer: &Buffer) {
        loop {
            let Err(full) = self.ring.put(buffer) else {
                return;
            };
            match self.policy {
                OverflowPolicy::DropNewest => {
                    self.counters.buffer_dropped();
                    warn!(capacity = full.capacity, "{full}");
                    return;
                }
                OverflowPolicy::Stall => {
                    if self.state.is_stopped() {
                        self.counters.buffer_dropped();
                        return;
                    }
                    thread::sleep(self.stall_interval);
                }
            }
        }
    }
}

/// Fill `buf` from `source`. Returns the number of bytes read, which is less than
/// `buf.len()` only at end of stream.
fn read_buffer<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
