//! `lembra-core` — shared types for the appointment reminder pipeline.
//!
//! Home of the domain vocabulary used by every other crate: appointment
//! records as read from the booking system, reminder kinds and their lead
//! times, delivery channels, the idempotency key that prevents duplicate
//! sends, Brazilian phone validation, and the TOML/env configuration layer.

pub mod config;
pub mod error;
pub mod phone;
pub mod types;

pub use error::{LembraError, Result};
pub use types::{Appointment, AppointmentStatus, Channel, ReminderKey, ReminderKind};
