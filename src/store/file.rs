//! Durable store backed by the persistence layer.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, warn};

use super::index::StoreIndex;
use super::{DeliveryStateStore, Result, StoreError, StoreStats};
use crate::persistence::{
    EventLog, StoreEventPayload, StoreSnapshot, cleanup_stale_generations, compact, events_path,
    fsync_dir, snapshot_path, try_load_snapshot,
};
use crate::types::{DeliveryRecord, DeliveryStatus, Fields, Identity};

/// Log size at which the store rolls to a new generation.
pub const DEFAULT_COMPACT_THRESHOLD_BYTES: u64 = 1024 * 1024;

const LOCK_FILE: &str = "store.lock";

#[derive(Debug, Clone, Copy)]
pub struct FileStoreOptions {
    pub compact_threshold_bytes: u64,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        FileStoreOptions {
            compact_threshold_bytes: DEFAULT_COMPACT_THRESHOLD_BYTES,
        }
    }
}

/// Store persisted as a snapshot plus an fsynced event log.
///
/// Every mutation is appended and synced before the in-memory index changes,
/// so an `Ok` return means the change survives a crash.
#[derive(Debug)]
pub struct FileStore {
    state_dir: PathBuf,
    generation: u64,
    log: EventLog,
    index: StoreIndex,
    options: FileStoreOptions,
    /// Held for the lifetime of the store; the OS releases the lock on drop.
    _lock: File,
}

impl FileStore {
    /// Opens the store in `state_dir` with default options.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(state_dir, FileStoreOptions::default())
    }

    /// Opens the store, recovering from any interrupted compaction and
    /// replaying the current generation's log.
    pub fn open_with(state_dir: impl AsRef<Path>, options: FileStoreOptions) -> Result<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&state_dir)?;

        let lock = acquire_lock(&state_dir)?;

        let generation = cleanup_stale_generations(&state_dir)?;
        let snapshot = match try_load_snapshot(&snapshot_path(&state_dir, generation))? {
            Some(snapshot) => snapshot,
            None => StoreSnapshot::empty(),
        };
        if snapshot.generation != generation {
            return Err(StoreError::Corrupt(format!(
                "snapshot for generation {generation} claims generation {}",
                snapshot.generation
            )));
        }

        let mut index = StoreIndex::from_records(snapshot.records);
        let log_path = events_path(&state_dir, generation);
        let (events, next_seq) = EventLog::replay(&log_path, snapshot.next_seq)?;
        let replayed = events.len();
        for event in &events {
            index.apply(event).map_err(StoreError::Corrupt)?;
        }

        let log = EventLog::open(&log_path, next_seq)?;
        fsync_dir(&state_dir)?;

        let stats = index.stats();
        info!(
            state_dir = %state_dir.display(),
            generation,
            replayed,
            pending = stats.pending,
            sent = stats.sent,
            "Opened delivery state store"
        );

        Ok(FileStore {
            state_dir,
            generation,
            log,
            index,
            options,
            _lock: lock,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn maybe_compact(&mut self) -> Result<()> {
        if self.log.size_bytes()? < self.options.compact_threshold_bytes {
            return Ok(());
        }

        let snapshot = StoreSnapshot {
            next_seq: self.log.next_seq(),
            records: self.index.sorted_records(),
            ..StoreSnapshot::empty()
        };
        let staged = compact(&self.state_dir, &snapshot)?;

        self.log = EventLog::open(events_path(&self.state_dir, staged.generation), staged.next_seq)?;
        fsync_dir(&self.state_dir)?;
        self.generation = staged.generation;
        Ok(())
    }
}

fn acquire_lock(state_dir: &Path) -> Result<File> {
    let path = state_dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            debug!(path = %path.display(), "Acquired store lock");
            Ok(file)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Store lock is held");
            Err(StoreError::Locked(state_dir.display().to_string()))
        }
    }
}

impl DeliveryStateStore for FileStore {
    fn insert_if_absent(&mut self, identity: &Identity, fields: &Fields) -> Result<bool> {
        if self.index.contains(identity) {
            return Ok(false);
        }

        let event = self.log.append(StoreEventPayload::Observed {
            identity: identity.clone(),
            fields: fields.clone(),
        })?;
        self.index.observe(identity, fields, event.seq, event.ts);
        self.maybe_compact()?;
        Ok(true)
    }

    fn mark_sent(&mut self, identity: &Identity) -> Result<()> {
        match self.index.get(identity) {
            None => return Err(StoreError::UnknownIdentity(identity.clone())),
            Some(record) if record.status == DeliveryStatus::Sent => return Ok(()),
            Some(_) => {}
        }

        let event = self.log.append(StoreEventPayload::Sent {
            identity: identity.clone(),
        })?;
        self.index.mark_sent(identity, event.ts);
        self.maybe_compact()
    }

    fn get_status(&self, identity: &Identity) -> Result<Option<DeliveryStatus>> {
        Ok(self.index.get(identity).map(|r| r.status))
    }

    fn get(&self, identity: &Identity) -> Result<Option<DeliveryRecord>> {
        Ok(self.index.get(identity).cloned())
    }

    fn list_pending(&self) -> Result<Vec<Identity>> {
        Ok(self.index.pending())
    }

    fn stats(&self) -> StoreStats {
        self.index.stats()
    }
}
