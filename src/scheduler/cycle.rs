//! One poll cycle: fetch, resolve, diff, deliver, reconcile.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::Scheduler;
use super::status::SchedulerState;
use crate::channel::MessageChannel;
use crate::diff::diff;
use crate::source::SnapshotSource;
use crate::store::{DeliveryStateStore, StoreError};
use crate::types::Identity;

/// Why a cycle ingested nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum CycleError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("{0}")]
    Schema(String),
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched_rows: usize,
    pub rejected_rows: usize,
    /// Identities seen for the first time.
    pub new_records: usize,
    pub duplicates: usize,
    pub already_sent: usize,
    /// Records from this snapshot delivered and marked sent.
    pub delivered: usize,
    /// Pending records absent from this snapshot delivered and marked sent.
    pub reconciled: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub error: Option<CycleError>,
}

impl CycleReport {
    pub fn new(cycle: u64) -> Self {
        let now = Utc::now();
        CycleReport {
            cycle,
            started_at: now,
            finished_at: now,
            fetched_rows: 0,
            rejected_rows: 0,
            new_records: 0,
            duplicates: 0,
            already_sent: 0,
            delivered: 0,
            reconciled: 0,
            failed: 0,
            cancelled: false,
            error: None,
        }
    }

    /// True if the fetch or resolve step failed.
    pub fn ingest_failed(&self) -> bool {
        self.error.is_some()
    }
}

impl<Src, St, Ch> Scheduler<Src, St, Ch>
where
    Src: SnapshotSource,
    St: DeliveryStateStore,
    Ch: MessageChannel,
{
    /// Runs one cycle.
    ///
    /// Fetch and schema failures end the cycle early with no deliveries and
    /// no store mutations; they are reported, not returned. A store error is
    /// returned because dedup state can no longer be trusted.
    #[instrument(skip_all, fields(cycle = self.cycles + 1))]
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<CycleReport, StoreError> {
        self.cycles += 1;
        let mut report = CycleReport::new(self.cycles);

        self.board.set_state(SchedulerState::Fetching);
        let fetched = tokio::select! {
            biased;

            _ = cancel.cancelled() => None,
            result = self.source.fetch() => Some(result),
        };
        let raw = match fetched {
            None => {
                report.cancelled = true;
                return Ok(self.finish(report));
            }
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                warn!(error = %e, "Fetch failed; skipping cycle");
                report.error = Some(CycleError::Fetch(e.to_string()));
                return Ok(self.finish(report));
            }
        };
        report.fetched_rows = raw.len();

        self.board.set_state(SchedulerState::Diffing);
        let resolution = match self.resolver.resolve(&raw) {
            Ok(resolution) => resolution,
            Err(e) => {
                error!(error = %e, "Source schema mismatch; skipping cycle");
                report.error = Some(CycleError::Schema(e.to_string()));
                return Ok(self.finish(report));
            }
        };
        report.rejected_rows = resolution.rejected.len();

        let outcome = diff(&resolution.records, &mut self.store)?;
        report.new_records = outcome.inserted;
        report.duplicates = outcome.duplicates_in_snapshot;
        report.already_sent = outcome.already_sent;

        self.board.set_state(SchedulerState::Delivering);
        for record in &outcome.to_deliver {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let tally = self.deliver_and_mark(record, cancel).await?;
            report.delivered += tally.delivered;
            report.failed += tally.failed;
            report.cancelled |= tally.cancelled;
            if tally.cancelled {
                break;
            }
        }

        if !report.cancelled {
            let in_snapshot: HashSet<Identity> = resolution
                .records
                .into_iter()
                .map(|r| r.identity)
                .collect();
            let tally = self.reconcile_pending(&in_snapshot, cancel).await?;
            report.reconciled = tally.delivered;
            report.failed += tally.failed;
            report.cancelled = tally.cancelled;
        }

        Ok(self.finish(report))
    }

    fn finish(&mut self, mut report: CycleReport) -> CycleReport {
        report.finished_at = Utc::now();
        let stats = self.store.stats();

        info!(
            fetched = report.fetched_rows,
            rejected = report.rejected_rows,
            new = report.new_records,
            duplicates = report.duplicates,
            delivered = report.delivered,
            reconciled = report.reconciled,
            failed = report.failed,
            pending = stats.pending,
            cancelled = report.cancelled,
            error = ?report.error,
            "Cycle finished"
        );

        self.board.record_cycle(&report, stats);
        self.board.set_state(SchedulerState::Idle);
        report
    }
}
