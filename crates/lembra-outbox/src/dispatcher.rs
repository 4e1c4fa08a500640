use async_trait::async_trait;
use lembra_core::Channel;
use thiserror::Error;

use crate::types::OutboxMessage;

/// Failure classification reported by a dispatcher.
///
/// The outbox applies the retry policy; dispatchers only say whether the
/// failure is worth retrying. Timeouts are classified by the outbox itself.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Provider hiccup (network error, 5xx, 429) — retry with backoff.
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// The message can never be delivered as-is (invalid recipient,
    /// rejected payload) — fail immediately, never retry.
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Transient(_))
    }
}

/// One outbound provider call per invocation — nothing else.
///
/// Implementations must not touch outbox or reminder state; all status
/// transitions happen in [`process_outbox`](crate::process::process_outbox),
/// which keeps dispatchers swappable and trivially stubbable in tests.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Which channel's messages this dispatcher handles.
    fn channel(&self) -> Channel;

    /// Attempt delivery of one rendered message.
    async fn dispatch(&self, msg: &OutboxMessage) -> Result<(), DispatchError>;
}
