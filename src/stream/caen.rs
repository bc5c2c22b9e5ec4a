//! CAEN V7x5 multiplexed event format.
//!
//! The front end reads several ADC/TDC modules per trigger. Each module reports a
//! block of big-endian 32-bit words:
//!
//! ```text
//! header        GGGGG 010 ........ ..CCCCCC ........   G = geo slot, C = count
//! parameter     GGGGG 000 ...HHHHH ....VVVV VVVVVVVV   H = channel, V = value
//! end-of-block  GGGGG 100 EEEEEEEE EEEEEEEE EEEEEEEE   E = event counter
//! ```
//!
//! Blocks belonging to one trigger may be separated by blocks for other triggers,
//! so a decoded block is merged into an [`EventFifo`] slot chosen by its event
//! counter. An event leaves the FIFO only when
//!
//! - the FIFO is full and room is needed for a new counter,
//! - a stop marker flushes everything pending (ends with `END_BUFFER`), or
//! - the end-of-run marker flushes everything pending (ends with `END_RUN`).
//!
//! Buffers also carry sentinel words for scaler blocks, buffer ends and padding.
//! FIFO contents persist across [`EventCodec::set_input`], so one event may span
//! two input buffers.

use super::event_fifo::EventFifo;
use super::words::{is_eof, WordReader, WordWriter};
use super::{EventCodec, EventInputStatus, MalformedWordPolicy, RunHeader, StreamFormat};
use crate::error::CodecError;
use std::io::{Read, Write};
use std::thread::{self, ThreadId};
use tracing::{debug, info, trace, warn};

/// Selects the word type.
pub const TYPE_MASK: u32 = 0x0700_0000;
/// Word type of a parameter.
pub const PARAMETER_TYPE: u32 = 0x0000_0000;
/// Word type of a module header.
pub const HEADER_TYPE: u32 = 0x0200_0000;
/// Word type of an end-of-block.
pub const END_OF_BLOCK_TYPE: u32 = 0x0400_0000;

/// Introduces a scaler block: a count word follows, then that many values.
pub const SCALER_BLOCK: u32 = 0x01CC_CCCC;
/// End of a front-end buffer.
pub const BUFFER_END: u32 = 0x01BB_BBBB;
/// Fills the unused tail of a buffer.
pub const BUFFER_PAD: u32 = 0x01FF_FFFF;
/// Acquisition stopped; flush pending events.
pub const STOP_PAD: u32 = 0x01DD_DDDD;
/// End of run; flush pending events.
pub const END_PAD: u32 = 0x01EE_EEEE;

const GEO_SHIFT: u32 = 27;
const GEO_MASK: u32 = 0x1F;
const CHANNEL_SHIFT: u32 = 16;
const CHANNEL_MASK: u32 = 0x1F;
const VALUE_MASK: u32 = 0x0FFF;
const COUNT_SHIFT: u32 = 8;
const COUNTER_MASK: u32 = 0x00FF_FFFF;

/// Channels on one module.
pub const CHANNELS_PER_MODULE: usize = 32;
/// Addressable geo slots.
pub const MAX_MODULES: usize = 32;
/// Width of a reassembled event.
pub const NUM_PARAMETERS: usize = CHANNELS_PER_MODULE * MAX_MODULES;
/// Default number of events held for reassembly.
pub const DEFAULT_FIFO_DEPTH: usize = 64;
/// Largest scaler block accepted.
pub const MAX_SCALERS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Filling,
    Full,
    Flush,
    EndRunFlush,
    Padding,
    Scaler,
}

fn is_header(word: u32) -> bool {
    word & TYPE_MASK == HEADER_TYPE
}

fn is_sentinel(word: u32) -> bool {
    matches!(word, SCALER_BLOCK | BUFFER_END | BUFFER_PAD | STOP_PAD | END_PAD)
}

/// Reassembling reader and block-emitting writer for CAEN data.
pub struct CaenCodec {
    event_size: usize,
    fifo: EventFifo,
    state: DecoderState,
    policy: MalformedWordPolicy,
    resyncing: bool,
    aborted: bool,
    /// Parameters of the block being read
    block: Vec<(usize, i32)>,
    scalers: Vec<i32>,
    scaler_blocks: u64,
    input: Option<WordReader>,
    output: Option<WordWriter>,
    header: Option<RunHeader>,
    next_counter: u32,
    owner: Option<ThreadId>,
}

impl CaenCodec {
    /// Codec with the default reassembly depth.
    pub fn new(event_size: usize) -> Self {
        Self::with_fifo_depth(event_size, DEFAULT_FIFO_DEPTH)
    }

    /// Codec holding at most `depth` events for reassembly.
    pub fn with_fifo_depth(event_size: usize, depth: usize) -> Self {
        Self {
            event_size,
            fifo: EventFifo::new(depth, NUM_PARAMETERS),
            state: DecoderState::Filling,
            policy: MalformedWordPolicy::default(),
            resyncing: false,
            aborted: false,
            block: Vec::with_capacity(CHANNELS_PER_MODULE),
            scalers: Vec::new(),
            scaler_blocks: 0,
            input: None,
            output: None,
            header: None,
            next_counter: 0,
            owner: None,
        }
    }

    /// Set the reaction to malformed words.
    #[must_use]
    pub fn with_policy(mut self, policy: MalformedWordPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current malformed-word policy.
    pub fn policy(&self) -> MalformedWordPolicy {
        self.policy
    }

    /// Whether an event with `counter` is waiting in the FIFO.
    pub fn is_pending(&self, counter: u32) -> bool {
        self.fifo.slot_of(counter & COUNTER_MASK).is_some()
    }

    /// Write a scaler block to the output.
    pub fn write_scalers(&mut self, values: &[i32]) -> Result<(), CodecError> {
        let output = self.output.as_mut().ok_or(CodecError::NoOutput)?;
        output.write_u32(SCALER_BLOCK)?;
        output.write_u32(values.len() as u32)?;
        for &value in values {
            output.write_u32(value as u32)?;
        }
        Ok(())
    }

    fn check_owner(&mut self) {
        let current = thread::current().id();
        let owner = *self.owner.get_or_insert(current);
        debug_assert_eq!(owner, current, "CAEN decoder driven from more than one thread");
    }

    fn position(&self) -> u64 {
        self.input.as_ref().map_or(0, WordReader::position)
    }

    fn read_word(&mut self) -> Result<u32, CodecError> {
        let input = self.input.as_mut().ok_or(CodecError::NoInput)?;
        Ok(input.read_u32()?)
    }

    /// Read words until the decoder leaves the filling state.
    fn fill(&mut self) -> Result<EventInputStatus, CodecError> {
        let mut status = EventInputStatus::Event;
        while self.state == DecoderState::Filling {
            let word = self.read_word()?;
            if self.resyncing {
                if !is_header(word) && !is_sentinel(word) {
                    trace!(word = format_args!("0x{word:08X}"), "Skipping word while resynchronizing");
                    continue;
                }
                self.resyncing = false;
            }

            if is_header(word) {
                self.read_block(word)?;
            } else if word == SCALER_BLOCK {
                self.read_scalers()?;
                status = EventInputStatus::ScalerValue;
                self.state = DecoderState::Scaler;
            } else {
                status = self.handle_special(word, status);
            }
        }
        Ok(status)
    }

    fn read_block(&mut self, header: u32) -> Result<(), CodecError> {
        let slot = ((header >> GEO_SHIFT) & GEO_MASK) as usize;
        self.block.clear();
        loop {
            let position = self.position();
            let word = self.read_word()?;
            match word & TYPE_MASK {
                PARAMETER_TYPE => {
                    let channel = ((word >> CHANNEL_SHIFT) & CHANNEL_MASK) as usize;
                    let value = (word & VALUE_MASK) as i32;
                    self.block.push((slot * CHANNELS_PER_MODULE + channel, value));
                }
                END_OF_BLOCK_TYPE => {
                    self.end_block(word & COUNTER_MASK);
                    return Ok(());
                }
                _ => {
                    return Err(CodecError::UnexpectedWord {
                        word,
                        position,
                        expected: "parameter or end-of-block",
                    })
                }
            }
        }
    }

    fn end_block(&mut self, counter: u32) {
        let slot = match self.fifo.slot_of(counter) {
            Some(slot) => slot,
            None => match self.fifo.insert(counter) {
                Some(slot) => slot,
                None => {
                    warn!(counter, "Reassembly FIFO full, dropping block");
                    return;
                }
            },
        };
        self.fifo.merge(slot, &self.block);
        if self.fifo.is_full() {
            self.state = DecoderState::Full;
        }
    }

    fn read_scalers(&mut self) -> Result<(), CodecError> {
        let position = self.position();
        let count = self.read_word()?;
        if count as usize > MAX_SCALERS {
            return Err(CodecError::UnexpectedWord {
                word: count,
                position,
                expected: "scaler count",
            });
        }
        self.scalers.clear();
        for _ in 0..count {
            let value = self.read_word()?;
            self.scalers.push(value as i32);
        }
        self.scaler_blocks += 1;
        Ok(())
    }

    fn handle_special(&mut self, word: u32, status: EventInputStatus) -> EventInputStatus {
        match word {
            BUFFER_END => {
                self.state = DecoderState::Padding;
                EventInputStatus::EndBuffer
            }
            STOP_PAD => {
                debug!(pending = self.fifo.len(), "Stop marker, flushing");
                self.state = DecoderState::Flush;
                status
            }
            END_PAD => {
                info!(
                    scaler_blocks = self.scaler_blocks,
                    pending = self.fifo.len(),
                    "End of run marker"
                );
                self.scaler_blocks = 0;
                self.state = DecoderState::EndRunFlush;
                status
            }
            _ => {
                self.state = DecoderState::Padding;
                EventInputStatus::Ignore
            }
        }
    }

    fn read_when_not_filling(
        &mut self,
        event: &mut [i32],
        status: EventInputStatus,
    ) -> EventInputStatus {
        match self.state {
            DecoderState::Flush | DecoderState::EndRunFlush => {
                if self.fifo.pop_oldest(event).is_some() {
                    EventInputStatus::Event
                } else {
                    let done = if self.state == DecoderState::Flush {
                        EventInputStatus::EndBuffer
                    } else {
                        EventInputStatus::EndRun
                    };
                    self.state = DecoderState::Filling;
                    done
                }
            }
            DecoderState::Full => {
                self.fifo.pop_oldest(event);
                self.state = DecoderState::Filling;
                EventInputStatus::Event
            }
            DecoderState::Scaler | DecoderState::Padding | DecoderState::Filling => {
                self.state = DecoderState::Filling;
                status
            }
        }
    }
}

impl EventCodec for CaenCodec {
    fn format(&self) -> StreamFormat {
        StreamFormat::Caen
    }

    fn event_size(&self) -> usize {
        self.event_size
    }

    fn set_input(&mut self, input: Box<dyn Read + Send>) {
        self.input = Some(WordReader::new(input));
        self.aborted = false;
    }

    fn close_input(&mut self) {
        self.input = None;
    }

    fn reset(&mut self) {
        self.fifo.clear();
        self.state = DecoderState::Filling;
        self.resyncing = false;
        self.aborted = false;
        self.block.clear();
        self.scalers.clear();
        self.scaler_blocks = 0;
    }

    fn pending_events(&self) -> usize {
        self.fifo.len()
    }

    fn set_output(&mut self, output: Box<dyn Write + Send>) {
        self.output = Some(WordWriter::new(output));
    }

    fn read_header(&mut self) -> Result<(), CodecError> {
        let input = self.input.as_mut().ok_or(CodecError::NoInput)?;
        self.header = Some(RunHeader::read_from(input)?);
        Ok(())
    }

    fn header(&self) -> Option<&RunHeader> {
        self.header.as_ref()
    }

    fn write_header(&mut self, header: &RunHeader) -> Result<(), CodecError> {
        let output = self.output.as_mut().ok_or(CodecError::NoOutput)?;
        header.write_to(output)
    }

    fn read_event(&mut self, event: &mut [i32]) -> Result<EventInputStatus, CodecError> {
        self.check_owner();
        if self.input.is_none() {
            return Err(CodecError::NoInput);
        }
        if self.aborted {
            return Ok(EventInputStatus::EndFile);
        }

        match self.fill() {
            Ok(status) => Ok(self.read_when_not_filling(event, status)),
            Err(CodecError::Io(err)) if is_eof(&err) => {
                debug!(pending = self.fifo.len(), "End of input");
                Ok(EventInputStatus::EndFile)
            }
            Err(err) => {
                if matches!(err, CodecError::UnexpectedWord { .. }) {
                    match self.policy {
                        MalformedWordPolicy::Continue => {}
                        MalformedWordPolicy::Resync => self.resyncing = true,
                        MalformedWordPolicy::Abort => self.aborted = true,
                    }
                }
                Err(err)
            }
        }
    }

    fn write_event(&mut self, event: &[i32]) -> Result<(), CodecError> {
        let output = self.output.as_mut().ok_or(CodecError::NoOutput)?;
        if let Some(index) = event
            .iter()
            .enumerate()
            .skip(NUM_PARAMETERS)
            .find_map(|(index, &value)| (value != 0).then_some(index))
        {
            return Err(CodecError::ParameterOutOfRange(index));
        }
        if let Some((parameter, &value)) = event
            .iter()
            .enumerate()
            .find(|&(_, &value)| !(0..=VALUE_MASK as i32).contains(&value))
        {
            return Err(CodecError::ValueOutOfRange { parameter, value });
        }

        let counter = self.next_counter & COUNTER_MASK;
        self.next_counter = self.next_counter.wrapping_add(1);

        for (module, channels) in event.chunks(CHANNELS_PER_MODULE).enumerate() {
            let hits = channels.iter().filter(|&&value| value != 0).count() as u32;
            if hits == 0 {
                continue;
            }
            let geo = (module as u32) << GEO_SHIFT;
            output.write_u32(HEADER_TYPE | geo | (hits << COUNT_SHIFT))?;
            for (channel, &value) in channels.iter().enumerate() {
                if value != 0 {
                    output.write_u32(
                        PARAMETER_TYPE
                            | geo
                            | ((channel as u32) << CHANNEL_SHIFT)
                            | value as u32,
                    )?;
                }
            }
            output.write_u32(END_OF_BLOCK_TYPE | geo | counter)?;
        }
        Ok(())
    }

    fn write_end_run(&mut self) -> Result<(), CodecError> {
        let output = self.output.as_mut().ok_or(CodecError::NoOutput)?;
        output.write_u32(END_PAD)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        if let Some(output) = self.output.as_mut() {
            output.flush()?;
        }
        Ok(())
    }

    fn close_output(&mut self) -> Result<(), CodecError> {
        self.flush()?;
        self.output = None;
        Ok(())
    }

    fn is_end_run(&self, word: u32) -> bool {
        word & 0xFFFF == END_PAD & 0xFFFF
    }

    fn scaler_values(&self) -> &[i32] {
        &self.scalers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::io::Cursor;

    fn stream(words: &[u32]) -> Box<dyn Read + Send> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        Box::new(Cursor::new(bytes))
    }

    fn header(slot: u32, count: u32) -> u32 {
        HEADER_TYPE | (slot << GEO_SHIFT) | (count << COUNT_SHIFT)
    }

    fn param(slot: u32, channel: u32, value: u32) -> u32 {
        (slot << GEO_SHIFT) | (channel << CHANNEL_SHIFT) | value
    }

    fn eob(slot: u32, counter: u32) -> u32 {
        END_OF_BLOCK_TYPE | (slot << GEO_SHIFT) | counter
    }

    /// One module block with `(channel, value)` pairs.
    fn block(slot: u32, counter: u32, values: &[(u32, u32)]) -> Vec<u32> {
        let mut words = vec![header(slot, values.len() as u32)];
        words.extend(values.iter().map(|&(ch, v)| param(slot, ch, v)));
        words.push(eob(slot, counter));
        words
    }

    fn read(codec: &mut CaenCodec, event: &mut [i32]) -> EventInputStatus {
        event.fill(0);
        codec.read_event(event).unwrap()
    }

    #[test]
    fn test_blocks_with_same_counter_merge_into_one_event() {
        let mut words = block(0, 7, &[(0, 100), (1, 200)]);
        words.extend(block(1, 7, &[(0, 300)]));
        words.push(END_PAD);

        let mut codec = CaenCodec::new(64);
        codec.set_input(stream(&words));
        let mut event = vec![0i32; 64];

        assert_eq!(read(&mut codec, &mut event), EventInputStatus::Event);
        assert_eq!(event[0], 100);
        assert_eq!(event[1], 200);
        assert_eq!(event[32], 300);
        assert_eq!(event.iter().filter(|&&v| v != 0).count(), 3);

        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndRun);
        assert_eq!(codec.pending_events(), 0);
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndFile);
    }

    #[test]
    fn test_full_fifo_evicts_oldest_before_new_counter() {
        let mut words = Vec::new();
        for counter in 1..=65u32 {
            words.extend(block(0, counter, &[(0, counter)]));
        }
        words.push(END_PAD);

        let mut codec = CaenCodec::new(8);
        codec.set_input(stream(&words));
        let mut event = vec![0i32; 8];

        assert_eq!(read(&mut codec, &mut event), EventInputStatus::Event);
        assert_eq!(event[0], 1);
        assert!(!codec.is_pending(65));
        assert_eq!(codec.pending_events(), DEFAULT_FIFO_DEPTH - 1);

        let mut delivered = vec![event[0]];
        loop {
            match read(&mut codec, &mut event) {
                EventInputStatus::Event => delivered.push(event[0]),
                EventInputStatus::EndRun => break,
                other => panic!("unexpected status {other}"),
            }
        }
        assert_eq!(delivered, (1..=65).collect::<Vec<i32>>());
    }

    #[test]
    fn test_interleaved_blocks_reassemble_in_first_seen_order() {
        let mut blocks: Vec<Vec<u32>> = Vec::new();
        for counter in 1..=20u32 {
            for slot in 0..3u32 {
                blocks.push(block(slot, counter, &[(0, counter * 10 + slot)]));
            }
        }
        blocks.shuffle(&mut StdRng::seed_from_u64(0x5EED));

        let mut first_seen = Vec::new();
        for b in &blocks {
            let counter = b[b.len() - 1] & COUNTER_MASK;
            if !first_seen.contains(&counter) {
                first_seen.push(counter);
            }
        }
        let mut words: Vec<u32> = blocks.concat();
        words.push(END_PAD);

        let mut codec = CaenCodec::new(96);
        codec.set_input(stream(&words));
        let mut event = vec![0i32; 96];

        for expected in first_seen {
            assert_eq!(read(&mut codec, &mut event), EventInputStatus::Event);
            for slot in 0..3usize {
                assert_eq!(event[slot * CHANNELS_PER_MODULE], (expected * 10) as i32 + slot as i32);
            }
        }
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndRun);
    }

    #[test]
    fn test_scalers_are_reported_while_events_pending() {
        let mut words = block(0, 1, &[(0, 5)]);
        words.extend([SCALER_BLOCK, 2, 111, 222]);
        words.push(END_PAD);

        let mut codec = CaenCodec::new(4);
        codec.set_input(stream(&words));
        let mut event = vec![0i32; 4];

        assert_eq!(read(&mut codec, &mut event), EventInputStatus::ScalerValue);
        assert_eq!(codec.scaler_values(), &[111, 222]);
        assert_eq!(codec.pending_events(), 1);

        assert_eq!(read(&mut codec, &mut event), EventInputStatus::Event);
        assert_eq!(event[0], 5);
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndRun);
    }

    #[test]
    fn test_stop_marker_flushes_then_reports_end_buffer() {
        let mut words = block(0, 1, &[(0, 1)]);
        words.extend(block(0, 2, &[(0, 2)]));
        words.push(STOP_PAD);
        words.extend(block(0, 3, &[(0, 3)]));
        words.push(END_PAD);

        let mut codec = CaenCodec::new(4);
        codec.set_input(stream(&words));
        let mut event = vec![0i32; 4];

        let mut statuses = Vec::new();
        let mut values = Vec::new();
        loop {
            let status = read(&mut codec, &mut event);
            statuses.push(status);
            if status == EventInputStatus::Event {
                values.push(event[0]);
            }
            if status == EventInputStatus::EndRun {
                break;
            }
        }
        assert_eq!(
            statuses,
            vec![
                EventInputStatus::Event,
                EventInputStatus::Event,
                EventInputStatus::EndBuffer,
                EventInputStatus::Event,
                EventInputStatus::EndRun,
            ]
        );
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_pending_events_survive_new_input() {
        let mut first = block(0, 1, &[(0, 10)]);
        first.extend([BUFFER_END, BUFFER_PAD, BUFFER_PAD]);

        let mut codec = CaenCodec::new(64);
        codec.set_input(stream(&first));
        let mut event = vec![0i32; 64];

        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndBuffer);
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::Ignore);
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::Ignore);
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndFile);
        assert!(codec.is_pending(1));

        // Second module of event 1 arrives in the next buffer
        let mut second = block(1, 1, &[(2, 20)]);
        second.push(END_PAD);
        codec.set_input(stream(&second));

        assert_eq!(read(&mut codec, &mut event), EventInputStatus::Event);
        assert_eq!(event[0], 10);
        assert_eq!(event[34], 20);
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndRun);
    }

    /// Header for slot 0, one parameter, then a stray header for slot 1.
    fn malformed_stream() -> Vec<u32> {
        vec![
            header(0, 2),
            param(0, 0, 5),
            header(1, 1),
            param(1, 0, 6),
            eob(1, 1),
            END_PAD,
        ]
    }

    #[test]
    fn test_malformed_word_reports_word_and_position() {
        let mut codec = CaenCodec::new(64);
        codec.set_input(stream(&malformed_stream()));
        let mut event = vec![0i32; 64];

        match codec.read_event(&mut event) {
            Err(CodecError::UnexpectedWord { word, position, .. }) => {
                assert_eq!(word, header(1, 1));
                assert_eq!(position, 8);
            }
            other => panic!("expected malformed word error, got {other:?}"),
        }

        // Continue: the stray parameter and end-of-block are consumed as padding
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::Ignore);
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::Ignore);
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndRun);
    }

    #[test]
    fn test_resync_skips_to_next_sentinel() {
        let mut codec = CaenCodec::new(64).with_policy(MalformedWordPolicy::Resync);
        codec.set_input(stream(&malformed_stream()));
        let mut event = vec![0i32; 64];

        assert!(codec.read_event(&mut event).is_err());
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndRun);
    }

    #[test]
    fn test_abort_ends_input_until_replaced() {
        let mut codec = CaenCodec::new(64).with_policy(MalformedWordPolicy::Abort);
        codec.set_input(stream(&malformed_stream()));
        let mut event = vec![0i32; 64];

        let err = codec.read_event(&mut event).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndFile);
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndFile);

        let mut fresh = block(0, 9, &[(3, 33)]);
        fresh.push(END_PAD);
        codec.set_input(stream(&fresh));
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::Event);
        assert_eq!(event[3], 33);
    }

    #[test]
    fn test_end_run_marker_matches_low_half_word() {
        let codec = CaenCodec::new(4);
        assert!(codec.is_end_run(END_PAD));
        assert!(codec.is_end_run(0x0000_EEEE));
        assert!(!codec.is_end_run(STOP_PAD));
    }

    #[test]
    fn test_written_events_reassemble() {
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct Sink(Arc<Mutex<Vec<u8>>>);
        impl Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let sink = Sink::default();
        let mut writer = CaenCodec::new(40);
        writer.set_output(Box::new(sink.clone()));
        writer.write_header(&RunHeader::new("caen", 3, 40)).unwrap();

        let mut first = vec![0i32; 40];
        first[1] = 11;
        first[33] = 22;
        let mut second = vec![0i32; 40];
        second[0] = 7;
        writer.write_event(&first).unwrap();
        writer.write_scalers(&[1, 2, 3]).unwrap();
        writer.write_event(&second).unwrap();
        writer.write_end_run().unwrap();
        writer.close_output().unwrap();

        let bytes = sink.0.lock().unwrap().clone();
        let mut reader = CaenCodec::new(40);
        reader.set_input(Box::new(Cursor::new(bytes)));
        reader.read_header().unwrap();
        assert_eq!(reader.header().unwrap().title, "caen");

        let mut event = vec![0i32; 40];
        assert_eq!(read(&mut reader, &mut event), EventInputStatus::ScalerValue);
        assert_eq!(reader.scaler_values(), &[1, 2, 3]);
        assert_eq!(read(&mut reader, &mut event), EventInputStatus::Event);
        assert_eq!(event, first);
        assert_eq!(read(&mut reader, &mut event), EventInputStatus::Event);
        assert_eq!(event, second);
        assert_eq!(read(&mut reader, &mut event), EventInputStatus::EndRun);
    }

    #[test]
    fn test_reset_discards_pending_events_and_state() {
        let mut first = block(0, 0, &[(0, 5)]);
        first.push(BUFFER_END);

        let mut codec = CaenCodec::new(64).with_policy(MalformedWordPolicy::Abort);
        codec.set_input(stream(&first));
        let mut event = vec![0i32; 64];
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndBuffer);
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndFile);
        assert_eq!(codec.pending_events(), 1);

        codec.reset();
        assert_eq!(codec.pending_events(), 0);
        assert!(!codec.is_pending(0));

        // Same counter in the next stream starts a new event
        let mut second = block(0, 0, &[(1, 9)]);
        second.push(END_PAD);
        codec.set_input(stream(&second));
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::Event);
        assert_eq!(&event[..3], &[0, 9, 0]);
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndRun);
    }

    #[test]
    fn test_reset_clears_abort() {
        let mut codec = CaenCodec::new(64).with_policy(MalformedWordPolicy::Abort);
        let mut words = malformed_stream();
        words.extend(block(0, 4, &[(2, 2)]));
        codec.set_input(stream(&words));
        let mut event = vec![0i32; 64];

        assert!(codec.read_event(&mut event).is_err());
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::EndFile);
        codec.reset();
        // The rest of the same stream is readable again
        assert_eq!(read(&mut codec, &mut event), EventInputStatus::Ignore);
    }

    #[test]
    fn test_values_outside_twelve_bits_are_rejected() {
        let mut writer = CaenCodec::new(40);
        writer.set_output(Box::new(std::io::sink()));

        let mut event = vec![0i32; 40];
        event[33] = 4096;
        assert!(matches!(
            writer.write_event(&event),
            Err(CodecError::ValueOutOfRange {
                parameter: 33,
                value: 4096
            })
        ));

        event[33] = 0;
        event[2] = -3;
        let err = writer.write_event(&event).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("-3"));

        event[2] = 4095;
        writer.write_event(&event).unwrap();
    }
}
