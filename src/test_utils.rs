//! Shared test utilities: fakes for the external seams and arbitrary
//! generators for property-based testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use crate::channel::{ChannelError, DeliveryPolicy, MessageChannel};
use crate::persistence::StoreEventPayload;
use crate::source::{FetchError, RawSnapshot, SnapshotSource};
use crate::types::{DeliveryRecord, DeliveryStatus, Fields, Identity};

// ─── Generators ───────────────────────────────────────────────────────────────

pub fn arb_identity() -> impl Strategy<Value = Identity> {
    "[0-9]{3,12}".prop_map(|s| Identity::new(s).unwrap())
}

pub fn arb_fields() -> impl Strategy<Value = Fields> {
    prop::collection::vec(("[a-z_?]{1,12}", "\\PC{0,20}"), 0..6)
        .prop_map(|pairs| pairs.into_iter().collect())
}

pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000, 0u32..1_000_000_000)
        .prop_map(|(secs, nanos)| DateTime::from_timestamp(secs, nanos).unwrap())
}

pub fn arb_store_event_payload() -> impl Strategy<Value = StoreEventPayload> {
    prop_oneof![
        (arb_identity(), arb_fields())
            .prop_map(|(identity, fields)| StoreEventPayload::Observed { identity, fields }),
        arb_identity().prop_map(|identity| StoreEventPayload::Sent { identity }),
    ]
}

pub fn arb_delivery_record() -> impl Strategy<Value = DeliveryRecord> {
    (
        arb_identity(),
        arb_fields(),
        any::<u64>(),
        arb_timestamp(),
        prop::option::of(arb_timestamp()),
    )
        .prop_map(|(identity, fields, seq, observed_at, sent_at)| {
            let mut record = DeliveryRecord::observed(identity, fields, seq, observed_at);
            if let Some(at) = sent_at {
                record.status = DeliveryStatus::Sent;
                record.sent_at = Some(at);
            }
            record
        })
}

// ─── Snapshot source ──────────────────────────────────────────────────────────

/// A header row plus data rows, as string slices.
pub fn snapshot(headers: &[&str], rows: &[&[&str]]) -> RawSnapshot {
    RawSnapshot::new(
        headers.iter().map(|h| h.to_string()).collect(),
        rows.iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect(),
    )
}

#[derive(Default)]
struct ScriptedSourceInner {
    script: VecDeque<Result<RawSnapshot, FetchError>>,
    last: Option<RawSnapshot>,
    fetches: usize,
}

/// Returns scripted fetch results in order, then keeps returning the last
/// successful snapshot. Clones share the script.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    inner: Arc<Mutex<ScriptedSourceInner>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, snapshot: RawSnapshot) -> &Self {
        self.inner.lock().unwrap().script.push_back(Ok(snapshot));
        self
    }

    pub fn push_error(&self, error: FetchError) -> &Self {
        self.inner.lock().unwrap().script.push_back(Err(error));
        self
    }

    pub fn fetches(&self) -> usize {
        self.inner.lock().unwrap().fetches
    }
}

impl SnapshotSource for ScriptedSource {
    async fn fetch(&self) -> Result<RawSnapshot, FetchError> {
        let mut inner = self.inner.lock().unwrap();
        inner.fetches += 1;
        match inner.script.pop_front() {
            Some(Ok(snapshot)) => {
                inner.last = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(e)) => Err(e),
            None => inner.last.clone().ok_or(FetchError::Empty),
        }
    }
}

// ─── Message channel ──────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingChannelInner {
    sent: Vec<String>,
    failures: VecDeque<ChannelError>,
    attempts: usize,
}

/// Records every acknowledged message. Scripted failures are returned, one
/// per send attempt, before sends start succeeding again. Clones share state.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    inner: Arc<Mutex<RecordingChannelInner>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: ChannelError) {
        self.inner.lock().unwrap().failures.push_back(error);
    }

    /// Acknowledged messages, in send order.
    pub fn sent(&self) -> Vec<String> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Send calls, including failed ones.
    pub fn attempts(&self) -> usize {
        self.inner.lock().unwrap().attempts
    }
}

impl MessageChannel for RecordingChannel {
    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;
        match inner.failures.pop_front() {
            Some(e) => Err(e),
            None => {
                inner.sent.push(text.to_string());
                Ok(())
            }
        }
    }
}

/// Delivery policy with no spacing and millisecond backoffs.
pub fn fast_policy() -> DeliveryPolicy {
    DeliveryPolicy {
        rate_limit_margin: Duration::from_millis(1),
        transient_backoff: Duration::from_millis(1),
        record_spacing: Duration::ZERO,
        ..DeliveryPolicy::DEFAULT
    }
}
