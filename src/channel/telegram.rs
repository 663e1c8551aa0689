//! Telegram Bot API channel.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::MessageChannel;
use super::error::ChannelError;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Wait used when a 429 response carries no `retry_after`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Sends messages to one chat via `sendMessage`.
#[derive(Clone)]
pub struct TelegramChannel {
    client: reqwest::Client,
    /// `{api_base}/bot{token}/sendMessage`. Contains the token; never logged.
    endpoint: String,
    chat_id: String,
}

impl fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

impl TelegramChannel {
    pub fn new(
        api_base: &str,
        token: &str,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::from_reqwest(e.without_url()))?;

        Ok(TelegramChannel {
            client,
            endpoint: format!("{}/bot{token}/sendMessage", api_base.trim_end_matches('/')),
            chat_id: chat_id.into(),
        })
    }
}

impl MessageChannel for TelegramChannel {
    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
        };

        // Error URLs would include the bot token.
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::from_reqwest(e.without_url()))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChannelError::from_reqwest(e.without_url()))?;

        trace!(status, chars = text.chars().count(), "sendMessage response");
        classify_response(status, &bytes)
    }
}

/// Maps a `sendMessage` response to success or a categorized error.
///
/// - 2xx with `ok: true` → success
/// - 429 (HTTP or `error_code`) → rate limited, honouring `retry_after`
/// - 5xx → transient
/// - anything else → permanent
pub(crate) fn classify_response(status: u16, body: &[u8]) -> Result<(), ChannelError> {
    let parsed: Option<ApiResponse> = serde_json::from_slice(body).ok();

    if (200..300).contains(&status) && parsed.as_ref().is_none_or(|r| r.ok) {
        return Ok(());
    }

    let parsed = parsed.unwrap_or_default();
    let code = parsed.error_code.unwrap_or(status);
    let message = parsed
        .description
        .unwrap_or_else(|| format!("sendMessage returned HTTP {status}"));

    match code {
        429 => {
            let retry_after = parsed
                .parameters
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            Err(ChannelError::rate_limited(retry_after, message))
        }
        500..=599 => Err(ChannelError::transient(message).with_status(code)),
        _ => Err(ChannelError::permanent(message).with_status(code)),
    }
}
