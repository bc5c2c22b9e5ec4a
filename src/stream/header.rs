//! L002 run header record.
//!
//! Both event formats start with the same 256-byte big-endian header:
//!
//! ```text
//! offset  size  field
//!      0     8  "HEADER  "
//!      8    16  date, ASCII, space padded
//!     24    80  run title, ASCII, space padded
//!    104     4  run number
//!    108    16  reserved
//!    124     4  number of secondary headers (0)
//!    128     4  record length (8192)
//!    132     4  block image records (0)
//!    136     4  image record length (0)
//!    140     4  parameters per event
//!    144     4  data record length (8192)
//!    148   108  zero
//! ```

use super::words::{is_eof, WordReader, WordWriter};
use crate::data::ring_buffer::BUFFER_SIZE;
use crate::error::CodecError;
use chrono::Local;

/// Size of the header record in bytes.
pub const HEADER_SIZE: usize = 256;

/// Magic bytes that open every header record.
pub const HEADER_MAGIC: &[u8; 8] = b"HEADER  ";

const DATE_OFFSET: usize = 8;
const DATE_SIZE: usize = 16;
const TITLE_OFFSET: usize = 24;
const TITLE_SIZE: usize = 80;
const RUN_NUMBER_OFFSET: usize = 104;
const SECONDARY_HEADERS_OFFSET: usize = 124;
const RECORD_LENGTH_OFFSET: usize = 128;
const IMAGE_RECORDS_OFFSET: usize = 132;
const IMAGE_LENGTH_OFFSET: usize = 136;
const EVENT_SIZE_OFFSET: usize = 140;
const DATA_RECORD_LENGTH_OFFSET: usize = 144;

/// Run metadata carried at the start of an event file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHeader {
    /// Run title, at most 80 ASCII characters survive encoding.
    pub title: String,
    /// Run number.
    pub run_number: i32,
    /// Date string, at most 16 characters survive encoding.
    pub date: String,
    /// Parameters per event.
    pub event_size: usize,
}

impl RunHeader {
    /// Header stamped with the current local time.
    pub fn new(title: impl Into<String>, run_number: i32, event_size: usize) -> Self {
        Self {
            title: title.into(),
            run_number,
            date: Local::now().format("%d-%b-%y %H:%M").to_string(),
            event_size,
        }
    }

    /// Encode into the fixed 256-byte record.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut record = [0u8; HEADER_SIZE];
        record[..HEADER_MAGIC.len()].copy_from_slice(HEADER_MAGIC);
        put_text(&mut record[DATE_OFFSET..DATE_OFFSET + DATE_SIZE], &self.date);
        put_text(&mut record[TITLE_OFFSET..TITLE_OFFSET + TITLE_SIZE], &self.title);
        put_i32(&mut record, RUN_NUMBER_OFFSET, self.run_number);
        put_i32(&mut record, SECONDARY_HEADERS_OFFSET, 0);
        put_i32(&mut record, RECORD_LENGTH_OFFSET, BUFFER_SIZE as i32);
        put_i32(&mut record, IMAGE_RECORDS_OFFSET, 0);
        put_i32(&mut record, IMAGE_LENGTH_OFFSET, 0);
        put_i32(
            &mut record,
            EVENT_SIZE_OFFSET,
            i32::try_from(self.event_size).unwrap_or(i32::MAX),
        );
        put_i32(&mut record, DATA_RECORD_LENGTH_OFFSET, BUFFER_SIZE as i32);
        record
    }

    /// Decode a 256-byte record.
    pub fn decode(record: &[u8; HEADER_SIZE]) -> Result<Self, CodecError> {
        if &record[..HEADER_MAGIC.len()] != HEADER_MAGIC {
            return Err(CodecError::BadHeader(format!(
                "missing {:?} magic",
                String::from_utf8_lossy(HEADER_MAGIC)
            )));
        }
        let event_size = get_i32(record, EVENT_SIZE_OFFSET);
        let event_size = usize::try_from(event_size)
            .map_err(|_| CodecError::BadHeader(format!("negative event size {event_size}")))?;

        Ok(Self {
            title: get_text(&record[TITLE_OFFSET..TITLE_OFFSET + TITLE_SIZE]),
            run_number: get_i32(record, RUN_NUMBER_OFFSET),
            date: get_text(&record[DATE_OFFSET..DATE_OFFSET + DATE_SIZE]),
            event_size,
        })
    }

    pub(crate) fn read_from(reader: &mut WordReader) -> Result<Self, CodecError> {
        let mut record = [0u8; HEADER_SIZE];
        reader.read_bytes(&mut record).map_err(|err| {
            if is_eof(&err) {
                CodecError::BadHeader("stream ended inside the header record".to_string())
            } else {
                CodecError::Io(err)
            }
        })?;
        Self::decode(&record)
    }

    pub(crate) fn write_to(&self, writer: &mut WordWriter) -> Result<(), CodecError> {
        writer.write_bytes(&self.encode())?;
        Ok(())
    }
}

fn put_text(field: &mut [u8], text: &str) {
    field.fill(b' ');
    for (dst, src) in field.iter_mut().zip(text.bytes()) {
        *dst = if src.is_ascii() { src } else { b'?' };
    }
}

fn get_text(field: &[u8]) -> String {
    String::from_utf8_lossy(field)
        .trim_end_matches([' ', '\0'])
        .to_string()
}

fn put_i32(record: &mut [u8], offset: usize, value: i32) {
    record[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn get_i32(record: &[u8], offset: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&record[offset..offset + 4]);
    i32::from_be_bytes(bytes)
}
