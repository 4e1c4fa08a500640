//! `lembra-content` — channel-specific message rendering.
//!
//! Turns a [`TemplateContext`] into the exact text a patient receives:
//! HTML email bodies and compact SMS bodies, in pt-BR, with the clinic
//! identity taken from config. Rendering is pure — no network, no clock —
//! and all-or-nothing: a malformed context fails with [`TemplateDataError`]
//! before anything reaches the outbox.
//!
//! The SMS renderer enforces the 160-character ceiling itself; callers
//! never need to re-check.

pub mod error;
pub mod summary;
pub mod templates;

pub use error::TemplateDataError;
pub use summary::AppointmentSummary;
pub use templates::{
    generate_content, generate_email_subject, generate_reminder_email_content,
    generate_reminder_sms_content, generate_sms_content, TemplateContext, SMS_MAX_CHARS,
};
