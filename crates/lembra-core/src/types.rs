use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// An appointment as read from the booking system.
///
/// This crate never creates or mutates appointments — the booking subsystem
/// owns them. All timestamps are clinic-local (America/Sao_Paulo); the daemon
/// converts wall-clock UTC into clinic time before anything is compared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    /// Booking-system identifier — also the first segment of every
    /// [`ReminderKey`] derived from this appointment.
    pub id: String,
    pub patient_name: String,
    pub patient_email: String,
    /// Raw phone as entered by the patient; validated/normalized at dispatch.
    pub patient_phone: Option<String>,
    /// Calendar date of the visit (clinic-local).
    pub scheduled_date: NaiveDate,
    /// Time of day of the visit (clinic-local).
    pub scheduled_time: NaiveTime,
    pub status: AppointmentStatus,
}

impl Appointment {
    /// Combined clinic-local date and time of the visit.
    pub fn scheduled_at(&self) -> NaiveDateTime {
        self.scheduled_date.and_time(self.scheduled_time)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == AppointmentStatus::Cancelled
    }
}

/// Booking-system lifecycle state of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "completed" => Ok(AppointmentStatus::Completed),
            other => Err(format!("unknown appointment status: {other}")),
        }
    }
}

/// What kind of message a reminder record represents.
///
/// `Lead { hours }` covers the fixed 24h/2h cadence but any lead time can be
/// configured; the string form (`"24h"`, `"2h"`) is part of the persisted
/// idempotency-key contract and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReminderKind {
    /// Booking confirmation, raised once when the appointment is first seen.
    Confirmation,
    /// Reminder fired `hours` before the appointment.
    Lead { hours: u32 },
}

impl ReminderKind {
    /// Hours before the appointment at which this kind fires.
    /// Confirmation has no lead time — it fires at booking.
    pub fn lead_hours(&self) -> Option<u32> {
        match self {
            ReminderKind::Confirmation => None,
            ReminderKind::Lead { hours } => Some(*hours),
        }
    }
}

impl std::fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderKind::Confirmation => write!(f, "confirmation"),
            ReminderKind::Lead { hours } => write!(f, "{hours}h"),
        }
    }
}

impl std::str::FromStr for ReminderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "confirmation" {
            return Ok(ReminderKind::Confirmation);
        }
        s.strip_suffix('h')
            .and_then(|h| h.parse::<u32>().ok())
            .map(|hours| ReminderKind::Lead { hours })
            .ok_or_else(|| format!("unknown reminder kind: {s}"))
    }
}

/// Delivery channel for an outbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// Idempotency key for one delivery attempt slot.
///
/// The struct is the in-memory identity; `Display` produces the stable
/// on-disk string `<appointment_id>:<kind>:<channel>`. That string is what
/// prevents duplicate sends across overlapping ticks, restarts and
/// redeployments, so its format must not change without a data migration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReminderKey {
    pub appointment_id: String,
    pub kind: ReminderKind,
    pub channel: Channel,
}

impl ReminderKey {
    pub fn new(appointment_id: impl Into<String>, kind: ReminderKind, channel: Channel) -> Self {
        Self {
            appointment_id: appointment_id.into(),
            kind,
            channel,
        }
    }

    /// Key prefix shared by every channel of one (appointment, kind) pair.
    /// Used to reconcile reminder status from the outbox rows it fanned out to.
    pub fn reminder_prefix(appointment_id: &str, kind: ReminderKind) -> String {
        format!("{appointment_id}:{kind}:")
    }
}

impl std::fmt::Display for ReminderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.appointment_id, self.kind, self.channel)
    }
}
