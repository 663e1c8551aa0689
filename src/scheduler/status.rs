//! Scheduler status published for the HTTP status surface.
//!
//! The scheduler is the only writer. Readers hold a `watch::Receiver` and
//! never touch the store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use super::cycle::CycleReport;
use crate::store::StoreStats;

/// Where the poll loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Starting,
    Reconciling,
    Idle,
    Fetching,
    Diffing,
    Delivering,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub state: SchedulerState,
    pub started_at: DateTime<Utc>,
    pub cycles: u64,
    /// Cycles aborted by a fetch or schema error.
    pub failed_cycles: u64,
    pub delivered_total: u64,
    pub failed_deliveries_total: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_cycle: Option<CycleReport>,
    pub store: StoreStats,
}

impl RelayStatus {
    fn new() -> Self {
        RelayStatus {
            state: SchedulerState::Starting,
            started_at: Utc::now(),
            cycles: 0,
            failed_cycles: 0,
            delivered_total: 0,
            failed_deliveries_total: 0,
            last_success_at: None,
            last_cycle: None,
            store: StoreStats::default(),
        }
    }
}

/// Write side of the status channel.
#[derive(Debug)]
pub struct StatusBoard {
    tx: watch::Sender<RelayStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RelayStatus::new());
        StatusBoard { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<RelayStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> RelayStatus {
        self.tx.borrow().clone()
    }

    pub fn set_state(&self, state: SchedulerState) {
        self.tx.send_modify(|s| s.state = state);
    }

    pub fn set_store(&self, stats: StoreStats) {
        self.tx.send_modify(|s| s.store = stats);
    }

    /// Adds delivery counts from work done outside a cycle (startup
    /// reconciliation).
    pub fn add_deliveries(&self, delivered: usize, failed: usize, stats: StoreStats) {
        self.tx.send_modify(|s| {
            s.delivered_total += delivered as u64;
            s.failed_deliveries_total += failed as u64;
            s.store = stats;
        });
    }

    pub fn record_cycle(&self, report: &CycleReport, stats: StoreStats) {
        self.tx.send_modify(|s| {
            s.cycles += 1;
            s.delivered_total += (report.delivered + report.reconciled) as u64;
            s.failed_deliveries_total += report.failed as u64;
            if report.error.is_some() {
                s.failed_cycles += 1;
            } else {
                s.last_success_at = Some(report.finished_at);
            }
            s.last_cycle = Some(report.clone());
            s.store = stats;
        });
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
