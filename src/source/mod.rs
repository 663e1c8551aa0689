//! Snapshot sources.
//!
//! A source returns the *whole* current table on every fetch. There is no
//! append-only feed and no stable row id; change detection happens downstream
//! against the durable store.
//!
//! The [`SnapshotSource`] trait is the seam the scheduler is generic over, so
//! tests can script snapshot sequences without HTTP.

use std::future::Future;

use thiserror::Error;

mod csv_http;

pub use csv_http::{CsvHttpSource, google_sheets_export_url, parse_csv};

/// Errors that can occur while fetching a snapshot.
///
/// Every variant is cycle-local: the scheduler skips the cycle and tries again
/// on the next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure (DNS, connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The source answered with a non-success status.
    #[error("source returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// The body could not be parsed as CSV.
    #[error("malformed CSV: {0}")]
    Malformed(#[from] csv::Error),

    /// The body had no header row.
    #[error("snapshot has no header row")]
    Empty,
}

/// One fetch worth of raw tabular data.
///
/// Rows are positional; `rows[i][j]` belongs to column `headers[j]`. Rows may
/// be shorter than the header (trailing empty cells are often omitted).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSnapshot {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawSnapshot {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        RawSnapshot { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Fetches the current full snapshot from somewhere.
pub trait SnapshotSource {
    /// Fetches the whole table as it is right now.
    fn fetch(&self) -> impl Future<Output = Result<RawSnapshot, FetchError>> + Send;
}
