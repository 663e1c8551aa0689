//! Generation bookkeeping for the store directory.
//!
//! The `generation` file holds a single integer N. Generation N consists of
//! `snapshot.N.json` (absent for a fresh generation 0) and `events.N.log`.
//! Compaction moves the store to N+1; see the `compaction` module.
//!
//! The generation file is written with write-to-temp-then-rename, so after a
//! crash it holds either the old or the new number.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::fsync::{fsync_dir, fsync_file};

const GENERATION_FILE: &str = "generation";

/// Errors that can occur during generation file operations.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The generation file does not contain a number.
    #[error("invalid generation number: {0:?}")]
    InvalidNumber(String),
}

/// Result type for generation file operations.
pub type Result<T> = std::result::Result<T, GenerationError>;

/// Kind of per-generation file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GenerationFile {
    Events,
    Snapshot,
}

/// Reads the current generation number.
///
/// A missing or empty file means generation 0 (fresh state directory).
pub fn read_generation(state_dir: &Path) -> Result<u64> {
    let path = state_dir.join(GENERATION_FILE);

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    match BufReader::new(file).lines().next() {
        Some(Ok(line)) => line
            .trim()
            .parse()
            .map_err(|_| GenerationError::InvalidNumber(line)),
        Some(Err(e)) => Err(e.into()),
        None => Ok(0),
    }
}

/// Atomically replaces the generation number.
pub fn write_generation(state_dir: &Path, generation: u64) -> Result<()> {
    let path = state_dir.join(GENERATION_FILE);
    let tmp_path = state_dir.join("generation.tmp");

    std::fs::create_dir_all(state_dir)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        writeln!(file, "{generation}")?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, &path)?;
    fsync_dir(state_dir)?;

    Ok(())
}

pub fn snapshot_path(state_dir: &Path, generation: u64) -> PathBuf {
    state_dir.join(format!("snapshot.{generation}.json"))
}

pub fn events_path(state_dir: &Path, generation: u64) -> PathBuf {
    state_dir.join(format!("events.{generation}.log"))
}

/// Removes the snapshot and log of `generation`.
///
/// Files that are already gone are fine; other errors propagate.
pub fn delete_generation(state_dir: &Path, generation: u64) -> Result<()> {
    for path in [
        snapshot_path(state_dir, generation),
        events_path(state_dir, generation),
    ] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    match fsync_dir(state_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Lists per-generation files in the state directory, sorted by generation.
pub fn list_generation_files(state_dir: &Path) -> io::Result<Vec<(u64, GenerationFile)>> {
    let mut files = Vec::new();

    let entries = match std::fs::read_dir(state_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let name = entry?.file_name();
        let name = name.to_string_lossy();

        if let Some(generation) = name
            .strip_prefix("snapshot.")
            .and_then(|s| s.strip_suffix(".json"))
            .and_then(|s| s.parse().ok())
        {
            files.push((generation, GenerationFile::Snapshot));
        } else if let Some(generation) = name
            .strip_prefix("events.")
            .and_then(|s| s.strip_suffix(".log"))
            .and_then(|s| s.parse().ok())
        {
            files.push((generation, GenerationFile::Events));
        }
    }

    files.sort();
    Ok(files)
}
