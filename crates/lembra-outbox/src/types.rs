use lembra_core::{Channel, ReminderKey};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an outbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting to be claimed (fresh, or requeued after a retry backoff).
    Queued,
    /// Claimed by a worker; dispatch in flight.
    Sending,
    /// Confirmed delivered (terminal).
    Sent,
    /// Permanent delivery error — never retried (terminal).
    Failed,
    /// Retries exhausted (terminal, needs operator intervention).
    Dead,
    /// Appointment cancelled before dispatch (terminal).
    Skipped,
}

impl MessageStatus {
    /// Terminal states never leave the row again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Sent
                | MessageStatus::Failed
                | MessageStatus::Dead
                | MessageStatus::Skipped
        )
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::Dead => "dead",
            MessageStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(MessageStatus::Queued),
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            "dead" => Ok(MessageStatus::Dead),
            "skipped" => Ok(MessageStatus::Skipped),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

/// A persisted delivery attempt slot.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    /// Idempotency key string — primary key, stable on-disk contract.
    pub key: String,
    /// UUID of the current attempt cycle.
    pub id: String,
    pub appointment_id: String,
    pub channel: Channel,
    pub recipient: String,
    /// Subject line; `None` for SMS.
    pub subject: Option<String>,
    /// Fully rendered body — content generation happened before enqueue.
    pub body: String,
    pub status: MessageStatus,
    /// Completed dispatch attempts.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// ISO-8601 UTC instant before which the message must not be retried.
    pub next_retry_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Input to [`OutboxStore::enqueue`](crate::store::OutboxStore::enqueue).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub key: ReminderKey,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Per-run summary of one [`process_outbox`](crate::process::process_outbox)
/// pass, intended for logging and alerting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    /// Messages claimed (queued → sending) this run.
    pub claimed: usize,
    pub sent: usize,
    /// Transient failures re-queued with a backoff.
    pub retried: usize,
    /// Permanent failures (never retried).
    pub failed: usize,
    /// Messages that exhausted their retry budget this run.
    pub dead: usize,
    /// Messages dropped because the appointment was cancelled.
    pub skipped: usize,
}

/// Aggregate outbox counters for operational tooling.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutboxStats {
    pub total: u64,
    pub queued: u64,
    pub sending: u64,
    pub sent: u64,
    pub failed: u64,
    pub dead: u64,
    pub skipped: u64,
    pub email: u64,
    pub sms: u64,
    pub avg_attempts: f64,
}
