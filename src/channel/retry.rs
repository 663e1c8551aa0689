//! Retry policy for channel sends.
//!
//! - Rate limits: wait the channel's `retry_after` plus a safety margin and
//!   resend, with no retry cap
//! - Transient errors: back off (2s fixed by default) and retry up to 3 times
//! - Permanent errors: returned immediately
//!
//! Every wait is raced against a cancellation token. A send that is already
//! in flight is never interrupted.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{ChannelError, ChannelErrorKind};

/// Timing and retry limits for delivering records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryPolicy {
    /// Added to every `retry_after` the channel hands back.
    pub rate_limit_margin: Duration,

    /// Fixed delay before each transient retry.
    pub transient_backoff: Duration,

    /// Transient retries per chunk (not counting the initial attempt).
    pub max_transient_retries: u32,

    /// Minimum gap between the end of one record's sends and the start of
    /// the next record's.
    pub record_spacing: Duration,
}

impl DeliveryPolicy {
    pub const DEFAULT: Self = Self {
        rate_limit_margin: Duration::from_secs(1),
        transient_backoff: Duration::from_secs(2),
        max_transient_retries: 3,
        record_spacing: Duration::from_secs(1),
    };

    /// Wait before resending after a channel-supplied `retry_after`.
    ///
    /// `retry_after` comes off the wire, so the sum saturates.
    pub fn rate_limit_delay(&self, retry_after: Duration) -> Duration {
        retry_after.saturating_add(self.rate_limit_margin)
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Result of a retried send.
#[derive(Debug)]
pub enum RetryResult<T> {
    Success(T),

    /// Transient failures used up every retry.
    ExhaustedRetries {
        last_error: ChannelError,
        /// Attempts made, including rate-limited ones.
        attempts: u32,
    },

    PermanentError(ChannelError),

    /// Cancellation fired while waiting to retry.
    Cancelled,
}

impl<T> RetryResult<T> {
    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }
}

/// Sleeps for `delay` unless `cancel` fires first. Returns `false` if
/// cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Runs `operation` until it succeeds, fails permanently, runs out of
/// transient retries, or is cancelled during a wait.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &DeliveryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChannelError>>,
{
    let mut attempts = 0;
    let mut transient_failures = 0;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) => e,
        };

        let delay = match err.kind {
            ChannelErrorKind::Permanent => return RetryResult::PermanentError(err),
            ChannelErrorKind::RateLimited { retry_after } => {
                let delay = policy.rate_limit_delay(retry_after);
                warn!(
                    retry_after_secs = retry_after.as_secs_f64(),
                    wait_secs = delay.as_secs_f64(),
                    "Rate limited by channel"
                );
                delay
            }
            ChannelErrorKind::Transient => {
                if transient_failures >= policy.max_transient_retries {
                    return RetryResult::ExhaustedRetries {
                        last_error: err,
                        attempts,
                    };
                }
                let delay = policy.transient_backoff;
                transient_failures += 1;
                debug!(
                    error = %err,
                    retry = transient_failures,
                    wait_secs = delay.as_secs_f64(),
                    "Transient send failure, backing off"
                );
                delay
            }
        };

        if !sleep_or_cancel(delay, cancel).await {
            return RetryResult::Cancelled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// An operation that fails with each scripted error in turn, then succeeds.
    fn scripted(
        errors: Vec<ChannelError>,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> std::future::Ready<Result<u32, ChannelError>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let queue = Mutex::new(VecDeque::from(errors));
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let next = queue.lock().unwrap().pop_front();
            std::future::ready(match next {
                Some(e) => Err(e),
                None => Ok(n),
            })
        };
        (calls, op)
    }

    fn fast_policy() -> DeliveryPolicy {
        DeliveryPolicy {
            transient_backoff: Duration::from_millis(1),
            rate_limit_margin: Duration::from_millis(1),
            record_spacing: Duration::ZERO,
            ..DeliveryPolicy::DEFAULT
        }
    }

    #[test]
    fn default_policy_values() {
        let policy = DeliveryPolicy::DEFAULT;
        assert_eq!(policy.rate_limit_margin, Duration::from_secs(1));
        assert_eq!(policy.max_transient_retries, 3);
        assert_eq!(policy.record_spacing, Duration::from_secs(1));
    }

    #[test]
    fn rate_limit_delay_saturates_on_huge_retry_after() {
        let retry_after = Duration::from_secs(u64::MAX);

        let delay = DeliveryPolicy::DEFAULT.rate_limit_delay(retry_after);

        assert_eq!(delay, Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_backoff_is_fixed() {
        let (_, op) = scripted(vec![
            ChannelError::transient("502"),
            ChannelError::transient("502"),
            ChannelError::transient("502"),
        ]);
        let start = Instant::now();

        let result = retry_with_backoff(&DeliveryPolicy::DEFAULT, &CancellationToken::new(), op).await;

        assert!(result.is_success());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(6), "waited {waited:?}");
        assert!(waited < Duration::from_secs(7), "waited {waited:?}");
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let (calls, op) = scripted(vec![]);
        let result = retry_with_backoff(&fast_policy(), &CancellationToken::new(), op).await;

        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let (calls, op) = scripted(vec![ChannelError::permanent("chat not found")]);
        let result = retry_with_backoff(&fast_policy(), &CancellationToken::new(), op).await;

        assert!(matches!(result, RetryResult::PermanentError(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_succeeds_within_budget() {
        let (calls, op) = scripted(vec![
            ChannelError::transient("502"),
            ChannelError::transient("502"),
            ChannelError::transient("502"),
        ]);
        let result = retry_with_backoff(&fast_policy(), &CancellationToken::new(), op).await;

        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn transient_exhausts_retries() {
        let (calls, op) = scripted((0..10).map(|_| ChannelError::transient("down")).collect());
        let result = retry_with_backoff(&fast_policy(), &CancellationToken::new(), op).await;

        match result {
            RetryResult::ExhaustedRetries { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn rate_limits_do_not_consume_transient_budget() {
        let mut errors: Vec<ChannelError> = (0..6)
            .map(|_| ChannelError::rate_limited(Duration::from_millis(1), "429"))
            .collect();
        errors.extend((0..3).map(|_| ChannelError::transient("502")));
        let (calls, op) = scripted(errors);

        let result = retry_with_backoff(&fast_policy(), &CancellationToken::new(), op).await;

        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_retry_after_plus_margin() {
        let (_, op) = scripted(vec![ChannelError::rate_limited(
            Duration::from_secs(3),
            "429",
        )]);
        let start = Instant::now();

        let result = retry_with_backoff(&DeliveryPolicy::DEFAULT, &CancellationToken::new(), op).await;

        assert!(result.is_success());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(4), "waited {waited:?}");
        assert!(waited < Duration::from_secs(5), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_wait_stops_retrying() {
        let (calls, op) = scripted(vec![ChannelError::rate_limited(
            Duration::from_secs(60),
            "429",
        )]);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result = retry_with_backoff(&DeliveryPolicy::DEFAULT, &cancel, op).await;

        assert!(matches!(result, RetryResult::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sleep_or_cancel_returns_false_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(3600), &cancel).await);
    }

    proptest! {
        #[test]
        fn rate_limit_delay_is_retry_after_plus_margin(
            retry_after_secs in any::<u64>(),
            margin_ms in 0u64..10_000,
        ) {
            let policy = DeliveryPolicy {
                rate_limit_margin: Duration::from_millis(margin_ms),
                ..DeliveryPolicy::DEFAULT
            };
            let retry_after = Duration::from_secs(retry_after_secs);

            let delay = policy.rate_limit_delay(retry_after);

            prop_assert!(delay >= retry_after);
            if let Some(exact) = retry_after.checked_add(policy.rate_limit_margin) {
                prop_assert_eq!(delay, exact);
            }
        }
    }
}
