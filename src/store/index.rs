//! In-memory index shared by the store implementations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::persistence::{StoreEvent, StoreEventPayload};
use crate::types::{DeliveryRecord, DeliveryStatus, Fields, Identity};

use super::StoreStats;

/// Identity → record map with first-write-wins insertion.
#[derive(Debug, Default)]
pub(crate) struct StoreIndex {
    records: HashMap<Identity, DeliveryRecord>,
}

impl StoreIndex {
    pub(crate) fn from_records(records: Vec<DeliveryRecord>) -> Self {
        StoreIndex {
            records: records
                .into_iter()
                .map(|r| (r.identity.clone(), r))
                .collect(),
        }
    }

    pub(crate) fn contains(&self, identity: &Identity) -> bool {
        self.records.contains_key(identity)
    }

    pub(crate) fn get(&self, identity: &Identity) -> Option<&DeliveryRecord> {
        self.records.get(identity)
    }

    /// Inserts a pending record unless the identity is already known.
    pub(crate) fn observe(
        &mut self,
        identity: &Identity,
        fields: &Fields,
        seq: u64,
        at: DateTime<Utc>,
    ) -> bool {
        if self.records.contains_key(identity) {
            return false;
        }
        self.records.insert(
            identity.clone(),
            DeliveryRecord::observed(identity.clone(), fields.clone(), seq, at),
        );
        true
    }

    /// Marks a known identity as sent. Returns `false` if it is unknown.
    pub(crate) fn mark_sent(&mut self, identity: &Identity, at: DateTime<Utc>) -> bool {
        match self.records.get_mut(identity) {
            Some(record) => {
                if record.status != DeliveryStatus::Sent {
                    record.status = DeliveryStatus::Sent;
                    record.sent_at = Some(at);
                }
                true
            }
            None => false,
        }
    }

    /// Applies a replayed log event.
    ///
    /// A `sent` event for an identity that was never observed means the log
    /// and snapshot disagree; that is reported as an error.
    pub(crate) fn apply(&mut self, event: &StoreEvent) -> Result<(), String> {
        match &event.payload {
            StoreEventPayload::Observed { identity, fields } => {
                self.observe(identity, fields, event.seq, event.ts);
                Ok(())
            }
            StoreEventPayload::Sent { identity } => {
                if self.mark_sent(identity, event.ts) {
                    Ok(())
                } else {
                    Err(format!(
                        "event {} marks unknown identity {identity} as sent",
                        event.seq
                    ))
                }
            }
        }
    }

    /// Pending identities in first-observed order.
    pub(crate) fn pending(&self) -> Vec<Identity> {
        let mut pending: Vec<&DeliveryRecord> =
            self.records.values().filter(|r| r.is_pending()).collect();
        pending.sort_by_key(|r| r.seq);
        pending.into_iter().map(|r| r.identity.clone()).collect()
    }

    /// All records in first-observed order.
    pub(crate) fn sorted_records(&self) -> Vec<DeliveryRecord> {
        let mut records: Vec<DeliveryRecord> = self.records.values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    pub(crate) fn stats(&self) -> StoreStats {
        let pending = self.records.values().filter(|r| r.is_pending()).count();
        StoreStats {
            pending,
            sent: self.records.len() - pending,
        }
    }
}
