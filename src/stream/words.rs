//! Big-endian word I/O with byte position tracking.

use std::io::{self, Read, Write};

pub(crate) struct WordReader {
    inner: Box<dyn Read + Send>,
    position: u64,
}

impl WordReader {
    pub(crate) fn new(inner: Box<dyn Read + Send>) -> Self {
        Self { inner, position: 0 }
    }

    /// Byte offset of the next unread byte.
    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    pub(crate) fn read_u16(&mut self) -> io::Result<u16> {
        let mut bytes = [0u8; 2];
        self.read_bytes(&mut bytes)?;
        Ok(u16::from_be_bytes(bytes))
    }

    pub(crate) fn read_u32(&mut self) -> io::Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_bytes(&mut bytes)?;
        Ok(u32::from_be_bytes(bytes))
    }
}

pub(crate) struct WordWriter {
    inner: Box<dyn Write + Send>,
}

impl WordWriter {
    pub(crate) fn new(inner: Box<dyn Write + Send>) -> Self {
        Self { inner }
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)
    }

    pub(crate) fn write_u16(&mut self, word: u16) -> io::Result<()> {
        self.inner.write_all(&word.to_be_bytes())
    }

    pub(crate) fn write_u32(&mut self, word: u32) -> io::Result<()> {
        self.inner.write_all(&word.to_be_bytes())
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub(crate) fn is_eof(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::UnexpectedEof
}
