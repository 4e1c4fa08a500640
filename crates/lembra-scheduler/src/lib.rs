//! `lembra-scheduler` — due-reminder detection and orchestration.
//!
//! # Overview
//!
//! Reminder records are persisted to a SQLite `reminders` table, one row
//! per (appointment, kind), kept forever as an audit trail. The
//! [`engine::ReminderEngine`] ticks on an interval and, each tick:
//!
//! 1. sweeps pending reminders whose window closed past grace to `skipped`,
//! 2. ensures reminder records exist for every upcoming appointment,
//! 3. raises booking confirmations for appointments seen for the first time,
//! 4. runs [`finder::find_due_reminders`] over the ±tolerance window,
//! 5. renders content and enqueues email/SMS messages to the outbox,
//! 6. drains the outbox through the configured dispatchers,
//! 7. reconciles reminder status from the outbox rows each reminder
//!    fanned out to — the outbox is the single source of truth.
//!
//! # Reminder lifecycle
//!
//! `pending → enqueued → sent | skipped | dead`
//!
//! `skipped` covers both the missed-window edge case (target already past
//! tolerance + grace when first observed) and cancellation; `dead` means
//! some channel message exhausted its retries.

pub mod appointments;
pub mod db;
pub mod engine;
pub mod error;
pub mod finder;
pub mod store;

pub use appointments::{AppointmentStore, InMemoryAppointmentStore, SqliteAppointmentStore};
pub use engine::{ReminderEngine, TickReport};
pub use error::{Result, SchedulerError};
pub use finder::{find_due_reminders, DueState, ReminderCandidate};
pub use store::{Reminder, ReminderStatus, ReminderStore};
