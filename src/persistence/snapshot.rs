//! Store snapshots.
//!
//! A snapshot is the full set of delivery records at the start of a
//! generation. Snapshots are written with write-to-temp-then-rename:
//! 1. Write to `snapshot.<gen>.json.tmp`
//! 2. fsync the file
//! 3. Rename to `snapshot.<gen>.json`
//! 4. fsync the directory
//!
//! Readers therefore see either the previous snapshot or the new one.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fsync::{fsync_dir, fsync_file};
use crate::types::DeliveryRecord;

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema version mismatch.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// On-disk image of the store at the start of a generation.
///
/// Stored at `<state_dir>/snapshot.<generation>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub schema_version: u32,

    pub snapshot_at: DateTime<Utc>,

    /// The generation this snapshot opens (matches the filename suffix).
    pub generation: u64,

    /// Sequence number the first event of this generation's log will carry.
    pub next_seq: u64,

    /// Every known record, in ascending `seq` order.
    pub records: Vec<DeliveryRecord>,
}

impl StoreSnapshot {
    /// Creates an empty generation-0 snapshot.
    pub fn empty() -> Self {
        StoreSnapshot {
            schema_version: SCHEMA_VERSION,
            snapshot_at: Utc::now(),
            generation: 0,
            next_seq: 0,
            records: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.snapshot_at = Utc::now();
    }
}

/// Saves a snapshot atomically (temp file, fsync, rename, directory fsync).
pub fn save_snapshot_atomic(path: &Path, snapshot: &StoreSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(snapshot)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }

    Ok(())
}

/// Loads a snapshot, checking its schema version.
pub fn load_snapshot(path: &Path) -> Result<StoreSnapshot> {
    let bytes = std::fs::read(path)?;
    let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;

    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(SnapshotError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: snapshot.schema_version,
        });
    }

    Ok(snapshot)
}

/// Loads a snapshot, returning `None` if the file doesn't exist.
///
/// Any other failure (malformed JSON, schema mismatch) is an error.
pub fn try_load_snapshot(path: &Path) -> Result<Option<StoreSnapshot>> {
    match load_snapshot(path) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
