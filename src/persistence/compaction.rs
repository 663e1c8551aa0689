//! Generation-based compaction of the store directory.
//!
//! Truncating the log in place after writing a snapshot is not crash-safe, so
//! compaction instead opens a new generation:
//! 1. Write `snapshot.<N+1>.json` (atomic, fsynced)
//! 2. Switch the `generation` file to N+1 (atomic, fsynced): the commit point
//! 3. Delete `snapshot.<N>.json` and `events.<N>.log`
//!
//! A crash before step 2 leaves generation N intact plus a complete,
//! harmless `snapshot.<N+1>.json`; [`cleanup_stale_generations`] adopts it on
//! the next start since it holds the same records.

use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use super::generation::{
    GenerationError, GenerationFile, delete_generation, list_generation_files, read_generation,
    snapshot_path, write_generation,
};
use super::snapshot::{SnapshotError, StoreSnapshot, save_snapshot_atomic};

/// Errors that can occur during compaction.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Generation file error.
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Snapshot error.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// The generation file points past every snapshot on disk.
    #[error("no snapshot for generation {0}")]
    MissingSnapshot(u64),
}

/// Result type for compaction operations.
pub type Result<T> = std::result::Result<T, CompactionError>;

/// Moves the store to a new generation whose snapshot is `snapshot`.
///
/// `snapshot.generation` and `snapshot_at` are overwritten; the caller
/// supplies the records and `next_seq`. Returns the staged snapshot as
/// written. On error the previous generation is still the active one.
pub fn compact(state_dir: &Path, snapshot: &StoreSnapshot) -> Result<StoreSnapshot> {
    let old_gen = read_generation(state_dir)?;
    let new_gen = old_gen + 1;

    let mut staged = snapshot.clone();
    staged.generation = new_gen;
    staged.touch();

    save_snapshot_atomic(&snapshot_path(state_dir, new_gen), &staged)?;
    write_generation(state_dir, new_gen)?;
    delete_generation(state_dir, old_gen)?;

    info!(
        generation = new_gen,
        records = staged.records.len(),
        "Compacted store"
    );
    Ok(staged)
}

/// Reconciles the directory after an interrupted compaction.
///
/// Picks the highest generation that has a snapshot (or the generation file's
/// value if there are no snapshots), rewrites the generation file if it
/// disagrees, deletes every other generation and any `.tmp` leftovers.
/// Returns the generation to open.
pub fn cleanup_stale_generations(state_dir: &Path) -> Result<u64> {
    let file_gen = read_generation(state_dir)?;
    let files = list_generation_files(state_dir)?;

    let max_snapshot_gen = files
        .iter()
        .filter(|(_, kind)| *kind == GenerationFile::Snapshot)
        .map(|(generation, _)| *generation)
        .max();

    let current_gen = match max_snapshot_gen {
        Some(max_gen) if max_gen > file_gen => {
            debug!(
                file_gen,
                snapshot_gen = max_gen,
                "Adopting snapshot from interrupted compaction"
            );
            write_generation(state_dir, max_gen)?;
            max_gen
        }
        _ => file_gen,
    };

    // Generation 0 may legitimately have no snapshot yet; any later one must.
    if current_gen > 0 && !snapshot_path(state_dir, current_gen).exists() {
        return Err(CompactionError::MissingSnapshot(current_gen));
    }

    for (generation, _) in files {
        if generation != current_gen {
            delete_generation(state_dir, generation)?;
        }
    }

    cleanup_temp_files(state_dir)?;
    Ok(current_gen)
}

fn cleanup_temp_files(state_dir: &Path) -> io::Result<()> {
    let entries = match std::fs::read_dir(state_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        if entry.file_name().to_string_lossy().ends_with(".tmp") {
            let path = entry.path();
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "Could not remove temp file");
            }
        }
    }
    Ok(())
}
