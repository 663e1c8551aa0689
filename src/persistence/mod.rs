//! Durability machinery for the delivery state store.
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/
//!   store.lock        # advisory lock held by the single writer
//!   generation        # current generation number (single integer)
//!   snapshot.N.json   # all records at the start of generation N (absent for a fresh N = 0)
//!   events.N.log      # mutations since that snapshot (JSON Lines)
//! ```
//!
//! # Recovery
//!
//! On open:
//! 1. Reconcile generations left behind by an interrupted compaction
//! 2. Load `snapshot.<N>.json`
//! 3. Replay `events.<N>.log`, truncating a torn final line
//!
//! # Crash Safety
//!
//! - Every event is fsynced before the mutation is acknowledged
//! - Snapshots and the generation file are written temp-then-rename with
//!   file and directory fsyncs
//! - Compaction commits by switching the generation file, so either the old
//!   or the new generation is complete at every point

pub mod compaction;
pub mod event;
pub mod fsync;
pub mod generation;
pub mod log;
pub mod snapshot;

pub use compaction::{CompactionError, cleanup_stale_generations, compact};
pub use event::{StoreEvent, StoreEventPayload};
pub use fsync::{fsync_dir, fsync_file};
pub use generation::{events_path, read_generation, snapshot_path};
pub use log::{EventLog, EventLogError};
pub use snapshot::{SCHEMA_VERSION, SnapshotError, StoreSnapshot, save_snapshot_atomic, try_load_snapshot};
