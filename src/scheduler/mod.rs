//! Poll scheduler.
//!
//! Drives fetch → resolve → diff → deliver on a fixed interval with a single
//! logical worker. One cycle runs at a time; a cycle that overruns the
//! interval is never interrupted, the next one simply starts late.
//!
//! # Reconciliation
//!
//! Before the first cycle, every pending record in the store is re-delivered
//! with its stored fields in first-observed order. Each cycle also ends by
//! re-delivering pending records that are no longer in the source, so a row
//! deleted after a failed delivery is still delivered eventually.
//!
//! # Failure Isolation
//!
//! Fetch and schema errors abort only the current cycle. Delivery failures
//! leave the record pending. Store errors end the scheduler.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::channel::{Deliverer, DeliveryFailure, DeliveryOutcome, MessageChannel};
use crate::resolve::Resolver;
use crate::source::SnapshotSource;
use crate::store::{DeliveryStateStore, StoreError};
use crate::types::{Identity, Record};

pub mod cycle;
pub mod status;


pub use cycle::{CycleError, CycleReport};
pub use status::{RelayStatus, SchedulerState, StatusBoard};

/// Default poll interval (10 seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Time between the starts of consecutive cycles.
    pub poll_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PollConfig {
    pub fn new() -> Self {
        PollConfig {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    pub fn with_interval(poll_interval: Duration) -> Self {
        PollConfig { poll_interval }
    }
}

/// Delivery counts for a batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub delivered: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// The poll loop. Owns the source, the store and the deliverer.
pub struct Scheduler<Src, St, Ch> {
    source: Src,
    resolver: Resolver,
    store: St,
    deliverer: Deliverer<Ch>,
    config: PollConfig,
    board: StatusBoard,
    cycles: u64,
}

impl<Src, St, Ch> Scheduler<Src, St, Ch>
where
    Src: SnapshotSource,
    St: DeliveryStateStore,
    Ch: MessageChannel,
{
    pub fn new(
        source: Src,
        resolver: Resolver,
        store: St,
        deliverer: Deliverer<Ch>,
        config: PollConfig,
    ) -> Self {
        let board = StatusBoard::new();
        board.set_store(store.stats());
        Scheduler {
            source,
            resolver,
            store,
            deliverer,
            config,
            board,
            cycles: 0,
        }
    }

    /// Returns a receiver for status updates.
    pub fn status(&self) -> watch::Receiver<RelayStatus> {
        self.board.subscribe()
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Re-delivers every pending record in the store.
    pub async fn reconcile(&mut self, cancel: &CancellationToken) -> Result<Tally, StoreError> {
        self.board.set_state(SchedulerState::Reconciling);
        let tally = self.reconcile_pending(&HashSet::new(), cancel).await?;
        if tally.delivered + tally.failed > 0 {
            info!(
                delivered = tally.delivered,
                failed = tally.failed,
                "Reconciled pending records"
            );
        }
        self.board
            .add_deliveries(tally.delivered, tally.failed, self.store.stats());
        self.board.set_state(SchedulerState::Idle);
        Ok(tally)
    }

    /// Reconciles, then runs exactly one cycle.
    pub async fn run_once(&mut self, cancel: &CancellationToken) -> Result<CycleReport, StoreError> {
        self.reconcile(cancel).await?;
        let report = self.run_cycle(cancel).await?;
        self.board.set_state(SchedulerState::Stopped);
        Ok(report)
    }

    /// Reconciles, then runs cycles on the poll interval until cancelled.
    pub async fn watch(&mut self, cancel: &CancellationToken) -> Result<(), StoreError> {
        info!(
            interval_secs = self.config.poll_interval.as_secs_f64(),
            "Watching source"
        );
        self.reconcile(cancel).await?;

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.run_cycle(cancel).await?;
        }

        self.board.set_state(SchedulerState::Stopped);
        info!(cycles = self.cycles, "Scheduler stopped");
        Ok(())
    }

    /// Delivers pending records not in `exclude`, oldest first.
    async fn reconcile_pending(
        &mut self,
        exclude: &HashSet<Identity>,
        cancel: &CancellationToken,
    ) -> Result<Tally, StoreError> {
        let mut tally = Tally::default();

        for identity in self.store.list_pending()? {
            if exclude.contains(&identity) {
                continue;
            }
            if cancel.is_cancelled() {
                tally.cancelled = true;
                break;
            }

            let record = self
                .store
                .get(&identity)?
                .ok_or_else(|| StoreError::UnknownIdentity(identity.clone()))?
                .to_record();
            let one = self.deliver_and_mark(&record, cancel).await?;
            tally.delivered += one.delivered;
            tally.failed += one.failed;
            if one.cancelled {
                tally.cancelled = true;
                break;
            }
        }

        Ok(tally)
    }

    /// Delivers one record and marks it sent only if every chunk landed.
    async fn deliver_and_mark(
        &mut self,
        record: &Record,
        cancel: &CancellationToken,
    ) -> Result<Tally, StoreError> {
        let mut tally = Tally::default();
        match self.deliverer.deliver(record, cancel).await {
            DeliveryOutcome::Delivered { .. } => {
                self.store.mark_sent(&record.identity)?;
                tally.delivered = 1;
            }
            DeliveryOutcome::Failed(DeliveryFailure::Cancelled) => tally.cancelled = true,
            DeliveryOutcome::Failed(_) => tally.failed = 1,
        }
        Ok(tally)
    }
}
