//! Non-durable store.

use chrono::Utc;

use super::index::StoreIndex;
use super::{DeliveryStateStore, Result, StoreError, StoreStats};
use crate::types::{DeliveryRecord, DeliveryStatus, Fields, Identity};

/// Store that lives only in memory.
///
/// A restart forgets every sent identity, so the next cycle re-delivers the
/// whole snapshot. Only for tests and explicitly ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    index: StoreIndex,
    next_seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeliveryStateStore for MemoryStore {
    fn insert_if_absent(&mut self, identity: &Identity, fields: &Fields) -> Result<bool> {
        let inserted = self
            .index
            .observe(identity, fields, self.next_seq, Utc::now());
        if inserted {
            self.next_seq += 1;
        }
        Ok(inserted)
    }

    fn mark_sent(&mut self, identity: &Identity) -> Result<()> {
        if self.index.mark_sent(identity, Utc::now()) {
            Ok(())
        } else {
            Err(StoreError::UnknownIdentity(identity.clone()))
        }
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
