//! fsync helpers.
//!
//! A store mutation is only reported as successful once it is on disk. For
//! appends that means syncing the file; for anything that creates, renames or
//! deletes a directory entry it also means syncing the containing directory,
//! otherwise the entry itself can be lost on power failure.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Flushes a file's data and metadata to stable storage.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Flushes a directory's entries to stable storage.
///
/// Call after creating, renaming or removing a file in `dir_path`.
///
/// # Errors
///
/// Fails if the directory cannot be opened or the sync fails.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}
