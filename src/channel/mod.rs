//! Rate-limited delivery of records to a messaging channel.
//!
//! [`MessageChannel`] is the raw "send one message" seam; [`TelegramChannel`]
//! implements it over the Bot API. [`Deliverer`] layers the delivery
//! discipline on top: rendering, chunking, per-kind retry and spacing
//! between records.

use std::future::Future;

pub mod delivery;
pub mod error;
pub mod format;
pub mod retry;
pub mod telegram;

pub use delivery::{Deliverer, DeliveryFailure, DeliveryOutcome};
pub use error::{ChannelError, ChannelErrorKind};
pub use format::{FieldLine, MAX_CHUNK_CHARS, MessageTemplate, split_into_chunks};
pub use retry::{DeliveryPolicy, sleep_or_cancel};
pub use telegram::{DEFAULT_API_BASE, TelegramChannel};

/// A destination that accepts one text message at a time.
///
/// The destination itself (chat id, credentials) is fixed at construction.
pub trait MessageChannel {
    /// Sends one message. `Ok` means the channel acknowledged it.
    fn send(&self, text: &str) -> impl Future<Output = Result<(), ChannelError>> + Send;
}
