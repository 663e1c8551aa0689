//! Delivering one record: render, chunk, send with retries.

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::MessageChannel;
use super::error::ChannelError;
use super::format::{MAX_CHUNK_CHARS, MessageTemplate, split_into_chunks};
use super::retry::{DeliveryPolicy, RetryResult, retry_with_backoff, sleep_or_cancel};
use crate::types::Record;

/// Why a record was not delivered.
///
/// The record stays pending in every case; reconciliation retries it later.
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        last_error: ChannelError,
        attempts: u32,
    },

    #[error("channel rejected the message: {0}")]
    Rejected(ChannelError),

    #[error("cancelled before delivery completed")]
    Cancelled,
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Every chunk was acknowledged.
    Delivered { chunks: usize },
    Failed(DeliveryFailure),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Sends records through a channel one at a time.
///
/// Remembers when the previous record's last send attempt finished, so the
/// next record waits at least `policy.record_spacing` after it, whatever its
/// outcome and however long its retries took.
#[derive(Debug)]
pub struct Deliverer<C> {
    channel: C,
    template: MessageTemplate,
    policy: DeliveryPolicy,
    max_chunk_chars: usize,
    last_end: Option<Instant>,
}

impl<C: MessageChannel> Deliverer<C> {
    pub fn new(channel: C, template: MessageTemplate, policy: DeliveryPolicy) -> Self {
        Deliverer {
            channel,
            template,
            policy,
            max_chunk_chars: MAX_CHUNK_CHARS,
            last_end: None,
        }
    }

    pub fn with_max_chunk_chars(mut self, max_chunk_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars;
        self
    }

    /// Delivers one record.
    ///
    /// Only waits are cancellable. Once a chunk's request is on the wire it
    /// runs to completion.
    pub async fn deliver(&mut self, record: &Record, cancel: &CancellationToken) -> DeliveryOutcome {
        if let Some(last) = self.last_end {
            let ready_at = last + self.policy.record_spacing;
            let now = Instant::now();
            if ready_at > now && !sleep_or_cancel(ready_at - now, cancel).await {
                return DeliveryOutcome::Failed(DeliveryFailure::Cancelled);
            }
        }
        if cancel.is_cancelled() {
            return DeliveryOutcome::Failed(DeliveryFailure::Cancelled);
        }

        let outcome = self.send_chunks(record, cancel).await;
        self.last_end = Some(Instant::now());
        outcome
    }

    async fn send_chunks(&self, record: &Record, cancel: &CancellationToken) -> DeliveryOutcome {
        let text = self.template.render(record);
        let chunks = split_into_chunks(&text, self.max_chunk_chars);
        let channel = &self.channel;

        for (index, chunk) in chunks.iter().copied().enumerate() {
            let failure = match retry_with_backoff(&self.policy, cancel, move || channel.send(chunk))
                .await
            {
                RetryResult::Success(()) => continue,
                RetryResult::ExhaustedRetries {
                    last_error,
                    attempts,
                } => DeliveryFailure::RetriesExhausted {
                    last_error,
                    attempts,
                },
                RetryResult::PermanentError(e) => DeliveryFailure::Rejected(e),
                RetryResult::Cancelled => DeliveryFailure::Cancelled,
            };

            warn!(
                identity = %record.identity,
                chunk = index + 1,
                of = chunks.len(),
                error = %failure,
                "Delivery failed; record stays pending"
            );
            return DeliveryOutcome::Failed(failure);
        }

        info!(identity = %record.identity, chunks = chunks.len(), "Delivered record");
        DeliveryOutcome::Delivered {
            chunks: chunks.len(),
        }
    }
}
