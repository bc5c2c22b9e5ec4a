//! Event file sequencing and output storage.
//!
//! [`StorageDaemon`] holds the ordered list of input event files for offline
//! replay and hands them out one at a time. [`OutputStorage`] owns the codec that
//! writes pre-sorted events to a new event file; any failure while opening,
//! writing the header or closing it disables output for the rest of the run
//! while sorting carries on.

use crate::error::AppResult;
use crate::stream::{EventCodec, RunHeader};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Extension of event files picked up by [`StorageDaemon::add_directory`].
pub const EVENT_FILE_EXTENSION: &str = "evn";

/// Ordered list of input files with a cursor.
#[derive(Default)]
pub struct StorageDaemon {
    files: Vec<PathBuf>,
    cursor: usize,
    current: Option<PathBuf>,
    pending: Option<BufReader<File>>,
}

impl StorageDaemon {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list and rewind.
    pub fn set_event_input_list(&mut self, files: impl IntoIterator<Item = PathBuf>) {
        self.files = files.into_iter().collect();
        self.rewind();
    }

    /// Append one file.
    pub fn add_event_file(&mut self, path: impl Into<PathBuf>) {
        self.files.push(path.into());
    }

    /// Append every `*.evn` file in `dir`, sorted by name. Returns the number added.
    pub fn add_directory(&mut self, dir: &Path) -> AppResult<usize> {
        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_event_file = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(EVENT_FILE_EXTENSION));
            if path.is_file() && is_event_file {
                found.push(path);
            }
        }
        found.sort();
        let added = found.len();
        debug!(dir = %dir.display(), added, "Added event files from directory");
        self.files.extend(found);
        Ok(added)
    }

    /// Append the files named in a list file: one path per line, blank lines skipped.
    /// Relative paths resolve against the list file's directory.
    pub fn load_list(&mut self, list: &Path) -> AppResult<usize> {
        let base = list.parent().map(Path::to_path_buf).unwrap_or_default();
        let reader = BufReader::new(File::open(list)?);
        let mut added = 0;
        for line in reader.lines() {
            let line = line?;
            let entry = line.trim();
            if entry.is_empty() {
                continue;
            }
            let path = Path::new(entry);
            self.files.push(if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            });
            added += 1;
        }
        info!(list = %list.display(), added, "Loaded event file list");
        Ok(added)
    }

    /// Write the list, one path per line.
    pub fn save_list(&self, list: &Path) -> AppResult<()> {
        let mut out = BufWriter::new(File::create(list)?);
        for file in &self.files {
            writeln!(out, "{}", file.display())?;
        }
        out.flush()?;
        Ok(())
    }

    /// Every file in the list.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Forget every file.
    pub fn clear(&mut self) {
        self.files.clear();
        self.rewind();
    }

    /// Restart from the first file.
    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.close_input();
    }

    /// Whether [`open_next`](Self::open_next) has a file left to try.
    pub fn has_more_files(&self) -> bool {
        self.cursor < self.files.len()
    }

    /// Close the previous file and open the next one that can be opened. Files
    /// that fail to open are logged and skipped.
    pub fn open_next(&mut self) -> bool {
        self.close_input();
        while let Some(path) = self.files.get(self.cursor).cloned() {
            self.cursor += 1;
            match File::open(&path) {
                Ok(file) => {
                    info!(file = %path.display(), "Sorting file");
                    self.pending = Some(BufReader::new(file));
                    self.current = Some(path);
                    return true;
                }
                Err(err) => error!(file = %path.display(), error = %err, "Could not open file"),
            }
        }
        false
    }

    /// Hand over the stream opened by the last [`open_next`](Self::open_next).
    pub fn take_input(&mut self) -> Option<Box<dyn Read + Send>> {
        self.pending
            .take()
            .map(|reader| Box::new(reader) as Box<dyn Read + Send>)
    }

    /// Drop the current file, if it has not been handed over yet.
    pub fn close_input(&mut self) {
        if let Some(path) = self.current.take() {
            debug!(file = %path.display(), "Closed file");
        }
        self.pending = None;
    }

    /// Name of the file most recently opened.
    pub fn current_file_name(&self) -> Option<&Path> {
        self.current.as_deref()
    }
}

/// Writer for the pre-sort output file.
pub struct OutputStorage {
    codec: Option<Box<dyn EventCodec>>,
    path: Option<PathBuf>,
    enabled: bool,
    header_written: bool,
    default_header: RunHeader,
    events_written: u64,
}

impl OutputStorage {
    /// Output that writes with `codec` once a file is opened.
    pub fn new(codec: Box<dyn EventCodec>, default_header: RunHeader) -> Self {
        Self {
            codec: Some(codec),
            path: None,
            enabled: false,
            header_written: false,
            default_header,
            events_written: 0,
        }
    }

    /// Output that never writes.
    pub fn disabled() -> Self {
        Self {
            codec: None,
            path: None,
            enabled: false,
            header_written: false,
            default_header: RunHeader::new("", 0, 0),
            events_written: 0,
        }
    }

    /// Whether events are currently being written.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// File being written, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Events written since the file was opened.
    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    fn disable(&mut self, step: &str, err: &dyn std::fmt::Display) {
        error!(
            file = ?self.path,
            step,
            error = %err,
            "Output failed, writing disabled for the rest of the run"
        );
        self.enabled = false;
    }

    /// Create `path` and start writing to it.
    pub fn open_output(&mut self, path: &Path) -> bool {
        let Some(codec) = self.codec.as_mut() else {
            warn!(file = %path.display(), "No output codec configured, not writing events");
            return false;
        };
        self.path = Some(path.to_path_buf());
        self.header_written = false;
        self.events_written = 0;
        match File::create(path) {
            Ok(file) => {
                codec.set_output(Box::new(BufWriter::new(file)));
                self.enabled = true;
                info!(file = %path.display(), "Writing events to output file");
                true
            }
            Err(err) => {
                self.disable("open", &err);
                false
            }
        }
    }

    /// Write the run header, once per file. Later calls are ignored.
    pub fn write_header(&mut self, header: &RunHeader) {
        if !self.enabled || self.header_written {
            return;
        }
        let Some(codec) = self.codec.as_mut() else {
            return;
        };
        match codec.write_header(header) {
            Ok(()) => self.header_written = true,
            Err(err) => self.disable("header", &err),
        }
    }

    /// Write one event. Returns whether it was written.
    pub fn write_event(&mut self, event: &[i32]) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.header_written {
            let header = self.default_header.clone();
            self.write_header(&header);
            if !self.enabled {
                return false;
            }
        }
        let Some(codec) = self.codec.as_mut() else {
            return false;
        };
        match codec.write_event(event) {
            Ok(()) => {
                self.events_written += 1;
                true
            }
            // Nothing reached the file, so later events can still be written
            Err(err) if err.is_recoverable() => {
                warn!(error = %err, "Event cannot be encoded, not written");
                false
            }
            Err(err) => {
                self.disable("event", &err);
                false
            }
        }
    }

    /// Write the end-of-run marker, flush and close. Returns whether a file was
    /// closed cleanly.
    pub fn close(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.enabled = false;
        let Some(codec) = self.codec.as_mut() else {
            return false;
        };
        let result = codec.write_end_run().and_then(|()| codec.close_output());
        match result {
            Ok(()) => {
                info!(file = ?self.path, events = self.events_written, "Closed output file");
                true
            }
            Err(err) => {
                self.disable("close", &err);
                false
            }
        }
    }
}
