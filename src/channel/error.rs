//! Delivery channel error types.
//!
//! Errors are categorized by what the sender should do next:
//!
//! - **RateLimited**: the channel said when to come back; wait that long and
//!   resend the same chunk
//! - **Transient**: 5xx, timeouts and connection failures; back off and retry
//!   a bounded number of times
//! - **Permanent**: the channel refused the message (bad chat id, revoked
//!   token, malformed request); retrying cannot help

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The kind of channel error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelErrorKind {
    /// The channel asked us to wait `retry_after` before sending again.
    RateLimited { retry_after: Duration },

    /// Safe to retry after a backoff.
    Transient,

    /// Not retriable.
    Permanent,
}

impl ChannelErrorKind {
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ChannelErrorKind::Permanent)
    }
}

/// A send failure with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct ChannelError {
    pub kind: ChannelErrorKind,

    /// The HTTP status code, if the failure came from a response.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying transport error, if any.
    #[source]
    pub source: Option<reqwest::Error>,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "channel error (HTTP {code}): {}", self.message),
            None => write!(f, "channel error: {}", self.message),
        }
    }
}

impl ChannelError {
    pub fn rate_limited(retry_after: Duration, message: impl Into<String>) -> Self {
        Self {
            kind: ChannelErrorKind::RateLimited { retry_after },
            status_code: Some(429),
            message: message.into(),
            source: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ChannelErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ChannelErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Categorizes a transport-level failure (no usable response).
    ///
    /// Timeouts, connection failures and interrupted bodies are transient.
    /// Anything else (a request that could not even be built) is permanent.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            ChannelErrorKind::Transient
        } else {
            ChannelErrorKind::Permanent
        };

        Self {
            kind,
            status_code: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            source: Some(err),
        }
    }
}
