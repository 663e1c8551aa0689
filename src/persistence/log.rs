//! Append-only event log with crash-safe replay.
//!
//! The log is JSON Lines: one [`StoreEvent`] per line, each line written with
//! a single `write_all` and synced before `append` returns.
//!
//! # Recovery
//!
//! A crash mid-append can leave a torn final line (partial JSON, or JSON
//! without its newline). Replay truncates exactly that line; it was never
//! acknowledged to the caller. Anything else that fails to parse, or a
//! sequence number that does not increase, is corruption and is reported as
//! an error rather than silently dropped: losing a `sent` event would cause
//! re-delivery.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use super::event::{StoreEvent, StoreEventPayload};
use super::fsync::fsync_file;

/// Errors that can occur during event log operations.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A line in the middle of the log is unreadable.
    #[error("corrupt event log {path} at byte {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventLogError>;

/// An open event log, ready for appending.
#[derive(Debug)]
pub struct EventLog {
    file: File,
    next_seq: u64,
}

impl EventLog {
    /// Opens (or creates) a log for appending.
    ///
    /// `next_seq` must come from the snapshot and a prior [`EventLog::replay`]
    /// so sequence numbers stay strictly increasing across generations.
    pub fn open(path: impl AsRef<Path>, next_seq: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;

        Ok(EventLog { file, next_seq })
    }

    /// Appends an event and syncs it to disk.
    ///
    /// When this returns `Ok`, the event survives a crash.
    pub fn append(&mut self, payload: StoreEventPayload) -> Result<StoreEvent> {
        let event = StoreEvent::new(self.next_seq, payload);

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        fsync_file(&self.file)?;

        self.next_seq += 1;
        Ok(event)
    }

    /// Returns the sequence number the next append will use.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Current size of the log file in bytes.
    pub fn size_bytes(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Reads every event in `path`, truncating a torn final line.
    ///
    /// `min_seq` is the snapshot's `next_seq`: every event in the log must be
    /// at or above it. Returns the events and the next sequence number to use
    /// (`min_seq` if the log is empty or missing).
    pub fn replay(path: impl AsRef<Path>, min_seq: u64) -> Result<(Vec<StoreEvent>, u64)> {
        let path = path.as_ref();

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((vec![], min_seq)),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut events = Vec::new();
        let mut next_seq = min_seq;
        let mut pos: u64 = 0;
        let mut torn_at: Option<u64> = None;

        loop {
            let mut line = Vec::new();
            let bytes_read = reader.read_until(b'\n', &mut line)?;
            if bytes_read == 0 {
                break;
            }

            let line_start = pos;
            pos += bytes_read as u64;
            let at_eof = pos == file_len;

            if !line.ends_with(b"\n") {
                // Only the final line can lack a newline; it was never synced.
                torn_at = Some(line_start);
                break;
            }

            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<StoreEvent>(trimmed) {
                Ok(event) => {
                    if event.seq < next_seq {
                        return Err(EventLogError::Corrupt {
                            path: path.to_path_buf(),
                            offset: line_start,
                            reason: format!(
                                "sequence {} does not follow {}",
                                event.seq,
                                next_seq.saturating_sub(1)
                            ),
                        });
                    }
                    next_seq = event.seq + 1;
                    events.push(event);
                }
                Err(e) if at_eof => {
                    warn!(path = %path.display(), error = %e, "Discarding torn final log line");
                    torn_at = Some(line_start);
                    break;
                }
                Err(e) => {
                    return Err(EventLogError::Corrupt {
                        path: path.to_path_buf(),
                        offset: line_start,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(offset) = torn_at {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(offset)?;
            fsync_file(&file)?;
        }

        Ok((events, next_seq))
    }
}
