//! L002 marker-based event format.
//!
//! Events are sequences of big-endian 16-bit words. A parameter is a marker word
//! `0x8000 | index` followed by its value; an event ends with `0xFFFF`. Indices
//! 2048 and above carry scaler values rather than event parameters.

use super::words::{is_eof, WordReader, WordWriter};
use super::{EventCodec, EventInputStatus, RunHeader, StreamFormat};
use crate::error::CodecError;
use std::io::{Read, Write};
use tracing::{debug, trace};

/// Terminates an event.
pub const EVENT_END_MARKER: u16 = 0xFFFF;
/// Terminates a buffer.
pub const BUFFER_END_MARKER: u16 = 0xFFF0;
/// Terminates a run.
pub const RUN_END_MARKER: u16 = 0xFF03;
/// Set on a word that introduces a parameter value.
pub const EVENT_PARAMETER_MARKER: u16 = 0x8000;
/// Selects the parameter index out of a marker word.
pub const EVENT_PARAMETER_MASK: u16 = 0x0FFF;
/// First index that names a scaler instead of an event parameter.
pub const SCALER_PARAMETER_BASE: usize = 2048;

/// Reader/writer for the L002 format.
pub struct L002Codec {
    event_size: usize,
    input: Option<WordReader>,
    output: Option<WordWriter>,
    header: Option<RunHeader>,
    scalers: Vec<i32>,
}

impl L002Codec {
    /// Codec for events of `event_size` parameters.
    pub fn new(event_size: usize) -> Self {
        Self {
            event_size,
            input: None,
            output: None,
            header: None,
            scalers: Vec::new(),
        }
    }
}

fn read_word(input: &mut WordReader) -> Result<Option<u16>, CodecError> {
    match input.read_u16() {
        Ok(word) => Ok(Some(word)),
        Err(err) if is_eof(&err) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

impl EventCodec for L002Codec {
    fn format(&self) -> StreamFormat {
        StreamFormat::L002
    }

    fn event_size(&self) -> usize {
        self.event_size
    }

    fn set_input(&mut self, input: Box<dyn Read + Send>) {
        self.input = Some(WordReader::new(input));
    }

    fn close_input(&mut self) {
        self.input = None;
    }

    fn set_output(&mut self, output: Box<dyn Write + Send>) {
        self.output = Some(WordWriter::new(output));
    }

    fn read_header(&mut self) -> Result<(), CodecError> {
        let input = self.input.as_mut().ok_or(CodecError::NoInput)?;
        let header = RunHeader::read_from(input)?;
        if header.event_size != self.event_size {
            debug!(
                header = header.event_size,
                configured = self.event_size,
                "Header event size differs from configured size"
            );
        }
        self.header = Some(header);
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
        let input = self.input.as_mut().ok_or(CodecError::NoInput)?;
        let limit = event.len().min(self.event_size);
        self.scalers.clear();
        let mut touched = false;

        let status = loop {
            let Some(word) = read_word(input)? else {
                break EventInputStatus::EndFile;
            };
            match word {
                EVENT_END_MARKER => {
                    return Ok(if touched {
                        EventInputStatus::Event
                    } else if !self.scalers.is_empty() {
                        EventInputStatus::ScalerValue
                    } else {
                        EventInputStatus::Ignore
                    });
                }
                BUFFER_END_MARKER => break EventInputStatus::EndBuffer,
                RUN_END_MARKER => break EventInputStatus::EndRun,
                marker if marker & EVENT_PARAMETER_MARKER != 0 => {
                    let index = usize::from(marker & EVENT_PARAMETER_MASK);
                    let Some(value) = read_word(input)? else {
                        break EventInputStatus::EndFile;
                    };
                    if index >= SCALER_PARAMETER_BASE {
                        self.scalers.push(i32::from(value));
                    } else if index < limit {
                        event[index] = i32::from(value);
                        touched = true;
                    } else {
                        trace!(index, "Skipping parameter beyond event size");
                    }
                }
                other => {
                    debug!(
                        word = format_args!("0x{other:04X}"),
                        position = input.position() - 2,
                        "Unknown L002 word"
                    );
                    break EventInputStatus::UnknownWord;
                }
            }
        };

        // Whatever was collected before the event terminator belongs to no event.
        if touched {
            event[..limit].fill(0);
        }
        Ok(status)
    }

    fn write_event(&mut self, event: &[i32]) -> Result<(), CodecError> {
        let output = self.output.as_mut().ok_or(CodecError::NoOutput)?;
        // Nothing is written for an event that cannot be encoded whole
        for (index, &value) in event.iter().enumerate().filter(|&(_, &value)| value != 0) {
            if index >= SCALER_PARAMETER_BASE {
                return Err(CodecError::ParameterOutOfRange(index));
            }
            if u16::try_from(value).is_err() {
                return Err(CodecError::ValueOutOfRange {
                    parameter: index,
                    value,
                });
            }
        }
        for (index, &value) in event.iter().enumerate().filter(|&(_, &value)| value != 0) {
            output.write_u16(EVENT_PARAMETER_MARKER | index as u16)?;
            output.write_u16(value as u16)?;
        }
        output.write_u16(EVENT_END_MARKER)?;
        Ok(())
    }

    fn write_end_run(&mut self) -> Result<(), CodecError> {
        let output = self.output.as_mut().ok_or(CodecError::NoOutput)?;
        output.write_u16(RUN_END_MARKER)?;
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
        word == u32::from(RUN_END_MARKER)
    }

    fn scaler_values(&self) -> &[i32] {
        &self.scalers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    fn words(words: &[u16]) -> Box<dyn Read + Send> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        Box::new(Cursor::new(bytes))
    }

    /// Write sink that stays inspectable after the codec takes ownership.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_reads_events_until_markers() {
        let mut codec = L002Codec::new(4);
        codec.set_input(words(&[
            0x8000, 11, 0x8002, 33, EVENT_END_MARKER,
            0x8001, 22, EVENT_END_MARKER,
            BUFFER_END_MARKER,
            RUN_END_MARKER,
        ]));
        let mut event = [0i32; 4];

        assert_eq!(codec.read_event(&mut event).unwrap(), EventInputStatus::Event);
        assert_eq!(event, [11, 0, 33, 0]);
        event.fill(0);

        assert_eq!(codec.read_event(&mut event).unwrap(), EventInputStatus::Event);
        assert_eq!(event, [0, 22, 0, 0]);

        assert_eq!(codec.read_event(&mut event).unwrap(), EventInputStatus::EndBuffer);
        assert_eq!(codec.read_event(&mut event).unwrap(), EventInputStatus::EndRun);
        assert_eq!(codec.read_event(&mut event).unwrap(), EventInputStatus::EndFile);
    }

    #[test]
    fn test_scaler_indices_are_reported_separately() {
        let mut codec = L002Codec::new(4);
        codec.set_input(words(&[0x8800, 1000, 0x8801, 2000, EVENT_END_MARKER]));
        let mut event = [0i32; 4];

        assert_eq!(codec.read_event(&mut event).unwrap(), EventInputStatus::ScalerValue);
        assert_eq!(codec.scaler_values(), &[1000, 2000]);
        assert_eq!(event, [0; 4]);
    }

    #[test]
    fn test_parameters_beyond_event_size_are_skipped() {
        let mut codec = L002Codec::new(2);
        codec.set_input(words(&[0x8000, 5, 0x8005, 99, EVENT_END_MARKER]));
        let mut event = [0i32; 2];
        assert_eq!(codec.read_event(&mut event).unwrap(), EventInputStatus::Event);
        assert_eq!(event, [5, 0]);
    }

    #[test]
    fn test_unknown_word_discards_partial_event() {
        let mut codec = L002Codec::new(2);
        codec.set_input(words(&[0x8000, 5, 0x1234, 0x8001, 6, EVENT_END_MARKER]));
        let mut event = [0i32; 2];

        assert_eq!(codec.read_event(&mut event).unwrap(), EventInputStatus::UnknownWord);
        assert_eq!(event, [0, 0]);
        assert_eq!(codec.read_event(&mut event).unwrap(), EventInputStatus::Event);
        assert_eq!(event, [0, 6]);
    }

    #[test]
    fn test_read_without_input_fails() {
        let mut codec = L002Codec::new(2);
        let mut event = [0i32; 2];
        assert!(matches!(codec.read_event(&mut event), Err(CodecError::NoInput)));
    }

    #[test]
    fn test_written_events_read_back() {
        let sink = SharedSink::default();
        let mut writer = L002Codec::new(3);
        writer.set_output(Box::new(sink.clone()));
        writer.write_header(&RunHeader::new("test", 7, 3)).unwrap();
        writer.write_event(&[0, 17, 4]).unwrap();
        writer.write_end_run().unwrap();
        writer.close_output().unwrap();

        let bytes = sink.0.lock().unwrap().clone();
        let mut reader = L002Codec::new(3);
        reader.set_input(Box::new(Cursor::new(bytes)));
        reader.read_header().unwrap();
        assert_eq!(reader.header().unwrap().run_number, 7);

        let mut event = [0i32; 3];
        assert_eq!(reader.read_event(&mut event).unwrap(), EventInputStatus::Event);
        assert_eq!(event, [0, 17, 4]);
        assert_eq!(reader.read_event(&mut event).unwrap(), EventInputStatus::EndRun);
    }

    #[test]
    fn test_writing_scaler_index_is_rejected() {
        let mut writer = L002Codec::new(4096);
        writer.set_output(Box::new(std::io::sink()));
        let mut event = vec![0i32; 4096];
        event[3000] = 1;
        assert!(matches!(
            writer.write_event(&event),
            Err(CodecError::ParameterOutOfRange(3000))
        ));
    }

    #[test]
    fn test_values_outside_sixteen_bits_are_rejected_whole() {
        let sink = SharedSink::default();
        let mut writer = L002Codec::new(3);
        writer.set_output(Box::new(sink.clone()));

        assert!(matches!(
            writer.write_event(&[5, 65_536, 0]),
            Err(CodecError::ValueOutOfRange {
                parameter: 1,
                value: 65_536
            })
        ));
        assert!(matches!(
            writer.write_event(&[0, 0, -1]),
            Err(CodecError::ValueOutOfRange {
                parameter: 2,
                value: -1
            })
        ));
        writer.flush().unwrap();
        assert!(sink.0.lock().unwrap().is_empty());

        writer.write_event(&[0, 65_535, 0]).unwrap();
        writer.close_output().unwrap();
        let bytes = sink.0.lock().unwrap().clone();
        assert_eq!(bytes, vec![0x80, 0x01, 0xFF, 0xFF, 0xFF, 0xFF]);
    }
}
