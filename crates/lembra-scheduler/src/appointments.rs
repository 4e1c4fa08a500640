//! Read-only access to the booking system's appointments.
//!
//! The scheduler never owns appointment data. In production it reads the
//! booking database through [`SqliteAppointmentStore`]; tests drive the
//! engine through [`InMemoryAppointmentStore`].

use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use lembra_core::{Appointment, AppointmentStatus};
use rusqlite::Connection;

use crate::{
    db::LOCAL_FMT,
    error::{Result, SchedulerError},
};

/// Source of upcoming appointments for the engine.
pub trait AppointmentStore: Send + Sync {
    /// Appointments scheduled at or after `now` (clinic-local), any status.
    /// Cancelled appointments are included so the engine can skip their
    /// queued messages.
    fn upcoming(&self, now: NaiveDateTime) -> Result<Vec<Appointment>>;

    /// Whether the appointment is currently cancelled. Unknown ids report
    /// `true` — a missing appointment must never receive a reminder.
    fn is_cancelled(&self, id: &str) -> Result<bool>;
}

impl<T: AppointmentStore + ?Sized> AppointmentStore for Arc<T> {
    fn upcoming(&self, now: NaiveDateTime) -> Result<Vec<Appointment>> {
        (**self).upcoming(now)
    }

    fn is_cancelled(&self, id: &str) -> Result<bool> {
        (**self).is_cancelled(id)
    }
}

/// Reads the booking system's `appointments` table in the shared database.
pub struct SqliteAppointmentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAppointmentStore {
    pub fn new(conn: Connection) -> Result<Self> {
        Self::shared(Arc::new(Mutex::new(conn)))
    }

    pub fn shared(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_appointments_table(&conn.lock().unwrap())?;
        Ok(Self { conn })
    }
}

/// The booking subsystem owns this table; the schema is created here only
/// so a fresh deployment starts without manual setup.
fn init_appointments_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS appointments (
            id             TEXT PRIMARY KEY,
            patient_name   TEXT NOT NULL,
            patient_email  TEXT NOT NULL,
            patient_phone  TEXT,
            scheduled_date TEXT NOT NULL,   -- YYYY-MM-DD, clinic-local
            scheduled_time TEXT NOT NULL,   -- HH:MM:SS, clinic-local
            status         TEXT NOT NULL DEFAULT 'scheduled'
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_appointments_date ON appointments (scheduled_date);
        ",
    )?;
    Ok(())
}

impl AppointmentStore for SqliteAppointmentStore {
    fn upcoming(&self, now: NaiveDateTime) -> Result<Vec<Appointment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT id, patient_name, patient_email, patient_phone,
                    scheduled_date, scheduled_time, status
             FROM appointments
             WHERE scheduled_date || 'T' || scheduled_time >= ?1
             ORDER BY scheduled_date, scheduled_time",
        )?;
        let rows: Vec<Appointment> = stmt
            .query_map([now.format(LOCAL_FMT).to_string()], map_row)?
            .filter_map(|r| r.ok())
            .filter_map(|raw| parse_row(raw).ok())
            .collect();
        Ok(rows)
    }

    fn is_cancelled(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let status: Option<String> = conn
            .query_row("SELECT status FROM appointments WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match status {
            Some(s) => Ok(s == "cancelled"),
            None => Ok(true),
        }
    }
}

type RawRow = (
    String,         // id
    String,         // patient_name
    String,         // patient_email
    Option<String>, // patient_phone
    String,         // scheduled_date
    String,         // scheduled_time
    String,         // status
);

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn parse_row(raw: RawRow) -> Result<Appointment> {
    let (id, patient_name, patient_email, patient_phone, date, time, status) = raw;
    let parse_err = |what: &str| SchedulerError::CorruptRow(format!("{id}: bad {what}"));
    Ok(Appointment {
        scheduled_date: date.parse().map_err(|_| parse_err("scheduled_date"))?,
        scheduled_time: time.parse().map_err(|_| parse_err("scheduled_time"))?,
        status: status
            .parse::<AppointmentStatus>()
            .map_err(|_| parse_err("status"))?,
        id,
        patient_name,
        patient_email,
        patient_phone,
    })
}

/// Test double: a mutable appointment list behind a mutex.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: Mutex<Vec<Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, appointment: Appointment) {
        let mut guard = self.appointments.lock().unwrap();
        guard.retain(|a| a.id != appointment.id);
        guard.push(appointment);
    }

    pub fn cancel(&self, id: &str) {
        let mut guard = self.appointments.lock().unwrap();
        if let Some(a) = guard.iter_mut().find(|a| a.id == id) {
            a.status = AppointmentStatus::Cancelled;
        }
    }
}

impl AppointmentStore for InMemoryAppointmentStore {
    fn upcoming(&self, now: NaiveDateTime) -> Result<Vec<Appointment>> {
        let guard = self.appointments.lock().unwrap();
        Ok(guard
            .iter()
            .filter(|a| a.scheduled_at() >= now)
            .cloned()
            .collect())
    }

    fn is_cancelled(&self, id: &str) -> Result<bool> {
        let guard = self.appointments.lock().unwrap();
        Ok(guard
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.is_cancelled())
            .unwrap_or(true))
    }
}
