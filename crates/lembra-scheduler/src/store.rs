use std::sync::{Arc, Mutex};

use chrono::{NaiveDateTime, Utc};
use lembra_core::ReminderKind;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    db::{init_db, LOCAL_FMT},
    error::{Result, SchedulerError},
};

/// Orchestrator-level state of one (appointment, kind) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    /// Record exists, target window not reached (or not yet processed).
    Pending,
    /// Channel messages created in the outbox; awaiting delivery.
    Enqueued,
    /// Every required channel message was delivered (terminal).
    Sent,
    /// Window missed or appointment cancelled before delivery (terminal).
    Skipped,
    /// Some channel message exhausted its retries (terminal) — shown
    /// separately from `sent` so operators can spot it.
    Dead,
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Enqueued => "enqueued",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Skipped => "skipped",
            ReminderStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "enqueued" => Ok(ReminderStatus::Enqueued),
            "sent" => Ok(ReminderStatus::Sent),
            "skipped" => Ok(ReminderStatus::Skipped),
            "dead" => Ok(ReminderStatus::Dead),
            other => Err(format!("unknown reminder status: {other}")),
        }
    }
}

/// A persisted reminder record.
#[derive(Debug, Clone)]
pub struct Reminder {
    pub appointment_id: String,
    pub kind: ReminderKind,
    /// Clinic-local instant at which this reminder was meant to fire.
    pub target_at: NaiveDateTime,
    pub status: ReminderStatus,
    /// ISO-8601 UTC timestamp of confirmed delivery, if any.
    pub sent_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Durable store for reminder records.
pub struct ReminderStore {
    conn: Arc<Mutex<Connection>>,
}

impl ReminderStore {
    pub fn new(conn: Connection) -> Result<Self> {
        Self::shared(Arc::new(Mutex::new(conn)))
    }

    pub fn shared(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_db(&conn.lock().unwrap())?;
        Ok(Self { conn })
    }

    /// Create the record for (appointment, kind) if it does not exist yet,
    /// then return it. Existing rows are left untouched — status and the
    /// audit trail survive repeated observation of the same appointment.
    pub fn ensure(
        &self,
        appointment_id: &str,
        kind: ReminderKind,
        target_at: NaiveDateTime,
    ) -> Result<Reminder> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO reminders
             (appointment_id, kind, target_at, status, sent_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', NULL, ?4, ?4)",
            rusqlite::params![
                appointment_id,
                kind.to_string(),
                target_at.format(LOCAL_FMT).to_string(),
                now
            ],
        )?;
        get_locked(&conn, appointment_id, kind)?.ok_or_else(|| {
            SchedulerError::CorruptRow(format!("{appointment_id}:{kind} missing after ensure"))
        })
    }

    pub fn get(&self, appointment_id: &str, kind: ReminderKind) -> Result<Option<Reminder>> {
        let conn = self.conn.lock().unwrap();
        get_locked(&conn, appointment_id, kind)
    }

    pub fn mark_enqueued(&self, appointment_id: &str, kind: ReminderKind) -> Result<()> {
        self.set_status(appointment_id, kind, ReminderStatus::Enqueued, None)
    }

    pub fn mark_sent(&self, appointment_id: &str, kind: ReminderKind) -> Result<()> {
        let sent_at = Utc::now().to_rfc3339();
        self.set_status(appointment_id, kind, ReminderStatus::Sent, Some(sent_at))
    }

    pub fn mark_skipped(&self, appointment_id: &str, kind: ReminderKind) -> Result<()> {
        self.set_status(appointment_id, kind, ReminderStatus::Skipped, None)
    }

    pub fn mark_dead(&self, appointment_id: &str, kind: ReminderKind) -> Result<()> {
        self.set_status(appointment_id, kind, ReminderStatus::Dead, None)
    }

    /// All reminders currently awaiting delivery confirmation.
    pub fn enqueued(&self) -> Result<Vec<Reminder>> {
        self.by_status(ReminderStatus::Enqueued)
    }

    /// Mark every pending reminder whose window already closed before
    /// `cutoff` as skipped. These are reminders the scheduler never had a
    /// chance to send (downtime, retroactively added kinds); sending them
    /// late would only confuse the patient. Runs on every tick so both the
    /// daemon loop and single-shot invocations resolve stale rows.
    pub fn sweep_missed(&self, cutoff: NaiveDateTime) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE reminders SET status='skipped', updated_at=?1
             WHERE status='pending' AND target_at < ?2",
            rusqlite::params![now, cutoff.format(LOCAL_FMT).to_string()],
        )?;
        if n > 0 {
            warn!(count = n, "stale pending reminders marked skipped");
        }
        Ok(n)
    }

    fn by_status(&self, status: ReminderStatus) -> Result<Vec<Reminder>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT appointment_id, kind, target_at, status, sent_at, created_at, updated_at
             FROM reminders WHERE status = ?1 ORDER BY target_at",
        )?;
        let rows: Vec<Reminder> = stmt
            .query_map([status.to_string()], map_row)?
            .filter_map(|r| r.ok())
            .filter_map(|raw| parse_row(raw).ok())
            .collect();
        Ok(rows)
    }

    fn set_status(
        &self,
        appointment_id: &str,
        kind: ReminderKind,
        status: ReminderStatus,
        sent_at: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE reminders SET status=?1, sent_at=COALESCE(?2, sent_at), updated_at=?3
             WHERE appointment_id=?4 AND kind=?5",
            rusqlite::params![status.to_string(), sent_at, now, appointment_id, kind.to_string()],
        )?;
        info!(appointment_id, kind = %kind, status = %status, "reminder status updated");
        Ok(())
    }
}

type RawRow = (
    String,         // appointment_id
    String,         // kind
    String,         // target_at
    String,         // status
    Option<String>, // sent_at
    String,         // created_at
    String,         // updated_at
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

fn parse_row(raw: RawRow) -> Result<Reminder> {
    let (appointment_id, kind, target_at, status, sent_at, created_at, updated_at) = raw;
    let parse_err =
        |what: &str| SchedulerError::CorruptRow(format!("{appointment_id}: bad {what}"));
    Ok(Reminder {
        kind: kind.parse().map_err(|_| parse_err("kind"))?,
        target_at: NaiveDateTime::parse_from_str(&target_at, LOCAL_FMT)
            .map_err(|_| parse_err("target_at"))?,
        status: status.parse().map_err(|_| parse_err("status"))?,
        appointment_id,
        sent_at,
        created_at,
        updated_at,
    })
}

fn get_locked(
    conn: &Connection,
    appointment_id: &str,
    kind: ReminderKind,
) -> Result<Option<Reminder>> {
    let mut stmt = conn.prepare_cached(
        "SELECT appointment_id, kind, target_at, status, sent_at, created_at, updated_at
         FROM reminders WHERE appointment_id = ?1 AND kind = ?2",
    )?;
    let raw = stmt
        .query_map(rusqlite::params![appointment_id, kind.to_string()], map_row)?
        .next()
        .transpose()?;
    raw.map(parse_row).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn store() -> ReminderStore {
        ReminderStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn target(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 14)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn ensure_is_idempotent_and_preserves_status() {
        let store = store();
        let kind = ReminderKind::Lead { hours: 24 };
        let first = store.ensure("apt-1", kind, target(14)).unwrap();
        assert_eq!(first.status, ReminderStatus::Pending);

        store.mark_sent("apt-1", kind).unwrap();
        let again = store.ensure("apt-1", kind, target(14)).unwrap();
        assert_eq!(again.status, ReminderStatus::Sent, "ensure must not reset status");
        assert!(again.sent_at.is_some());
    }

    #[test]
    fn status_transitions_are_recorded() {
        let store = store();
        let kind = ReminderKind::Lead { hours: 2 };
        store.ensure("apt-1", kind, target(12)).unwrap();
        store.mark_enqueued("apt-1", kind).unwrap();
        assert_eq!(store.enqueued().unwrap().len(), 1);

        store.mark_dead("apt-1", kind).unwrap();
        let row = store.get("apt-1", kind).unwrap().unwrap();
        assert_eq!(row.status, ReminderStatus::Dead);
        assert!(store.enqueued().unwrap().is_empty());
    }

    #[test]
    fn startup_sweep_skips_only_stale_pending_rows() {
        let store = store();
        let stale = ReminderKind::Lead { hours: 24 };
        let fresh = ReminderKind::Lead { hours: 2 };
        store.ensure("apt-1", stale, target(8)).unwrap();
        store.ensure("apt-1", fresh, target(20)).unwrap();

        let n = store.sweep_missed(target(10)).unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            store.get("apt-1", stale).unwrap().unwrap().status,
            ReminderStatus::Skipped
        );
        assert_eq!(
            store.get("apt-1", fresh).unwrap().unwrap().status,
            ReminderStatus::Pending
        );
    }
}
