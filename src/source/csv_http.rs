//! CSV-over-HTTP snapshot source.
//!
//! Google Sheets publishes any sheet as CSV at a stable export URL, which is
//! how the relay is normally fed. Any other URL serving CSV works the same way.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use super::{FetchError, RawSnapshot, SnapshotSource};

/// Returns the CSV export URL for a Google Sheets document.
pub fn google_sheets_export_url(sheet_id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{sheet_id}/export?format=csv")
}

/// Parses a CSV body into a raw snapshot.
///
/// The first record is the header. Ragged rows are accepted; blank lines are
/// skipped by the CSV reader.
pub fn parse_csv(body: &[u8]) -> Result<RawSnapshot, FetchError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body);

    let mut records = reader.records();
    let headers = match records.next() {
        Some(header) => header?.iter().map(str::to_string).collect(),
        None => return Err(FetchError::Empty),
    };

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawSnapshot::new(headers, rows))
}

/// Fetches a CSV document over HTTP on every call.
#[derive(Debug, Clone)]
pub struct CsvHttpSource {
    client: Client,
    url: String,
}

impl CsvHttpSource {
    /// Creates a source for `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(CsvHttpSource {
            client,
            url: url.into(),
        })
    }
}

impl SnapshotSource for CsvHttpSource {
    async fn fetch(&self) -> Result<RawSnapshot, FetchError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let body = response.bytes().await?;
        let snapshot = parse_csv(&body)?;
        debug!(rows = snapshot.len(), bytes = body.len(), "Fetched snapshot");
        Ok(snapshot)
    }
}
