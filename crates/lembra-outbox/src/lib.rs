//! `lembra-outbox` — durable outgoing-message queue with SQLite persistence.
//!
//! # Overview
//!
//! Messages are persisted to a SQLite `outbox` table keyed by idempotency
//! key (`<appointment_id>:<kind>:<channel>`). [`store::OutboxStore::enqueue`]
//! is an upsert by that key, and [`process::process_outbox`] drains the
//! queue through the registered [`dispatcher::Dispatcher`]s. Together they
//! give at-least-once delivery with at-most-one successful send per key,
//! even across overlapping ticks, multiple workers and process restarts.
//!
//! # Message lifecycle
//!
//! | Status    | Meaning                                               |
//! |-----------|-------------------------------------------------------|
//! | `queued`  | Waiting for a worker (possibly after a retry backoff) |
//! | `sending` | Claimed by a worker, dispatch in flight               |
//! | `sent`    | Confirmed delivered — terminal                        |
//! | `failed`  | Permanent error (bad recipient) — terminal            |
//! | `dead`    | Retries exhausted — terminal, needs operator action   |
//! | `skipped` | Appointment cancelled before dispatch — terminal      |
//!
//! Only this crate mutates message status; dispatchers just report success
//! or a transient/permanent classification.

pub mod backoff;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod process;
pub mod store;
pub mod types;

pub use dispatcher::{DispatchError, Dispatcher};
pub use error::{OutboxError, Result};
pub use process::{process_outbox, ProcessOptions};
pub use store::OutboxStore;
pub use types::{MessageStatus, NewMessage, OutboxMessage, OutboxStats, ProcessReport};
