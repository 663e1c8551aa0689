//! Snapshot differ.
//!
//! Compares one resolved snapshot against the store and returns the records
//! that still need delivering. Unknown identities are inserted as pending on
//! the way through, so a crash between here and delivery leaves them for the
//! next reconciliation pass.

use std::collections::HashSet;

use tracing::debug;

use crate::store::{DeliveryStateStore, Result, StoreError};
use crate::types::{DeliveryStatus, Identity, Record};

/// Result of diffing one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOutcome {
    /// Records to deliver, in snapshot row order.
    pub to_deliver: Vec<Record>,
    /// Identities this pass created in the store.
    pub inserted: usize,
    /// Rows skipped because their identity was already sent.
    pub already_sent: usize,
    /// Rows skipped because their identity appeared earlier in the snapshot.
    pub duplicates_in_snapshot: usize,
}

/// Diffs `records` against `store`.
///
/// A known pending identity is delivered with the fields stored when it was
/// first observed, not the fields in this snapshot.
pub fn diff(records: &[Record], store: &mut impl DeliveryStateStore) -> Result<DiffOutcome> {
    let mut outcome = DiffOutcome::default();
    let mut seen: HashSet<&Identity> = HashSet::with_capacity(records.len());

    for record in records {
        if !seen.insert(&record.identity) {
            debug!(identity = %record.identity, "Duplicate identity in snapshot");
            outcome.duplicates_in_snapshot += 1;
            continue;
        }

        if store.insert_if_absent(&record.identity, &record.fields)? {
            outcome.inserted += 1;
            outcome.to_deliver.push(record.clone());
            continue;
        }

        let stored = store
            .get(&record.identity)?
            .ok_or_else(|| StoreError::UnknownIdentity(record.identity.clone()))?;
        match stored.status {
            DeliveryStatus::Sent => outcome.already_sent += 1,
            DeliveryStatus::Pending => outcome.to_deliver.push(stored.to_record()),
        }
    }

    Ok(outcome)
}
