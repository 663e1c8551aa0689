//! Sheet Relay - delivers new rows of a polled spreadsheet to a Telegram chat.
//!
//! The source is re-read in full on every poll and has no stable row id, so
//! change detection runs against a durable delivery store: every record is
//! delivered at least once, and a record once acknowledged is not sent again.

pub mod channel;
pub mod config;
pub mod diff;
pub mod persistence;
pub mod resolve;
pub mod scheduler;
pub mod server;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_utils;
