//! Delivery state store.
//!
//! The store is the only thing that prevents re-delivery, so it is durable by
//! default ([`FileStore`]). [`MemoryStore`] keeps state in memory only; it is
//! a degraded mode for tests and throwaway runs and forgets everything on
//! restart.
//!
//! # Single Writer
//!
//! Exactly one poll cycle runs at a time and it owns the store mutably.
//! Mutating methods take `&mut self`; nothing else writes. [`FileStore`]
//! additionally holds an exclusive file lock so a second process cannot open
//! the same state directory.

use serde::Serialize;
use thiserror::Error;

use crate::persistence::{CompactionError, EventLogError, SnapshotError};
use crate::types::{DeliveryRecord, DeliveryStatus, Fields, Identity};

mod file;
mod index;
mod memory;

pub use file::{DEFAULT_COMPACT_THRESHOLD_BYTES, FileStore, FileStoreOptions};
pub use memory::MemoryStore;

/// Errors from the store.
///
/// None of these are recoverable within a cycle: the dedup state is
/// undefined once a mutation could not be made durable.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Event log error.
    #[error("event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// Snapshot error.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Compaction or generation recovery failed.
    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// Another process holds the state directory.
    #[error("state directory {0} is locked by another process")]
    Locked(String),

    /// Persisted state is internally inconsistent.
    #[error("corrupt store state: {0}")]
    Corrupt(String),

    /// `mark_sent` for an identity that was never inserted.
    #[error("unknown identity: {0}")]
    UnknownIdentity(Identity),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Counts of records by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub pending: usize,
    pub sent: usize,
}

/// Durable mapping from identity to delivery state.
pub trait DeliveryStateStore {
    /// Inserts a pending record unless the identity already exists.
    ///
    /// Returns `true` if this call created the record. An existing record is
    /// never modified (first write wins).
    fn insert_if_absent(&mut self, identity: &Identity, fields: &Fields) -> Result<bool>;

    /// Marks a record as sent. Idempotent.
    fn mark_sent(&mut self, identity: &Identity) -> Result<()>;

    /// Returns the status of an identity, or `None` if unknown.
    fn get_status(&self, identity: &Identity) -> Result<Option<DeliveryStatus>>;

    /// Returns the full stored record, or `None` if unknown.
    fn get(&self, identity: &Identity) -> Result<Option<DeliveryRecord>>;

    /// Identities still pending, in the order they were first observed.
    fn list_pending(&self) -> Result<Vec<Identity>>;

    fn stats(&self) -> StoreStats;
}
