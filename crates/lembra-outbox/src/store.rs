use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use lembra_core::phone::mask_recipient;
use rusqlite::Connection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{OutboxError, Result},
    types::{MessageStatus, NewMessage, OutboxMessage, OutboxStats},
};

const MESSAGE_COLUMNS: &str = "key, id, appointment_id, channel, recipient, subject, body,
     status, attempts, last_error, next_retry_at, created_at, updated_at";

/// Durable store for outgoing messages.
///
/// The single source of mutable shared state in the pipeline: every worker
/// reads and writes through the atomic claim here, so concurrent ticks and
/// multiple daemon instances draining the same database are safe.
pub struct OutboxStore {
    conn: Arc<Mutex<Connection>>,
}

impl OutboxStore {
    /// Wrap a dedicated connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        Self::shared(Arc::new(Mutex::new(conn)))
    }

    /// Share an existing connection handle (used by tests that keep every
    /// store on one in-memory database).
    pub fn shared(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_db(&conn.lock().unwrap())?;
        Ok(Self { conn })
    }

    /// Upsert-by-idempotency-key enqueue.
    ///
    /// If a message with the same key is already `sent` or still in flight
    /// (`queued`/`sending`), the call is a no-op returning the existing
    /// record — duplicate enqueues from overlapping ticks are a designed
    /// guarantee, not an error. A key sitting in a terminal failure state
    /// (`failed`/`dead`/`skipped`) is reset for a fresh attempt cycle.
    pub fn enqueue(&self, msg: NewMessage) -> Result<OutboxMessage> {
        let conn = self.conn.lock().unwrap();
        let key = msg.key.to_string();
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = get_locked(&conn, &key)? {
            match existing.status {
                MessageStatus::Queued | MessageStatus::Sending | MessageStatus::Sent => {
                    debug!(%key, status = %existing.status, "duplicate enqueue absorbed");
                    return Ok(existing);
                }
                MessageStatus::Failed | MessageStatus::Dead | MessageStatus::Skipped => {
                    let id = Uuid::new_v4().to_string();
                    conn.execute(
                        "UPDATE outbox SET id=?1, recipient=?2, subject=?3, body=?4,
                            status='queued', attempts=0, last_error=NULL,
                            next_retry_at=NULL, updated_at=?5
                         WHERE key=?6",
                        rusqlite::params![id, msg.recipient, msg.subject, msg.body, now, key],
                    )?;
                    info!(%key, previous = %existing.status, "terminal message re-queued");
                    return get_locked(&conn, &key)?
                        .ok_or_else(|| OutboxError::CorruptRow(key.clone()));
                }
            }
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO outbox
             (key, id, appointment_id, channel, recipient, subject, body,
              status, attempts, last_error, next_retry_at, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,'queued',0,NULL,NULL,?8,?8)",
            rusqlite::params![
                key,
                id,
                msg.key.appointment_id,
                msg.key.channel.to_string(),
                msg.recipient,
                msg.subject,
                msg.body,
                now
            ],
        )?;
        info!(%key, recipient = %mask_recipient(&msg.recipient), "message queued");
        get_locked(&conn, &key)?.ok_or_else(|| OutboxError::CorruptRow(key))
    }

    /// Atomically claim up to `batch` due messages (`queued` → `sending`).
    ///
    /// A row is due when `next_retry_at` is NULL or in the past. The claim
    /// UPDATE is guarded by `AND status='queued'`, so a second worker racing
    /// on the same row observes zero affected rows and skips it.
    pub fn claim_due(&self, now: DateTime<Utc>, batch: u32) -> Result<Vec<OutboxMessage>> {
        let conn = self.conn.lock().unwrap();
        let now_str = now.to_rfc3339();

        let due_keys: Vec<String> = {
            let mut stmt = conn.prepare_cached(
                "SELECT key FROM outbox
                 WHERE status = 'queued'
                   AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                 ORDER BY created_at
                 LIMIT ?2",
            )?;
            let keys: Vec<String> = stmt
                .query_map(rusqlite::params![now_str, batch], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            keys
        };

        let mut claimed = Vec::with_capacity(due_keys.len());
        for key in due_keys {
            let n = conn.execute(
                "UPDATE outbox SET status='sending', updated_at=?1
                 WHERE key=?2 AND status='queued'",
                rusqlite::params![now_str, key],
            )?;
            if n == 0 {
                // Another worker won the race for this row.
                debug!(%key, "claim lost to concurrent worker");
                continue;
            }
            if let Some(message) = get_locked(&conn, &key)? {
                claimed.push(message);
            }
        }
        Ok(claimed)
    }

    /// Delivery confirmed — terminal.
    pub fn mark_sent(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE outbox SET status='sent', attempts=attempts+1,
                last_error=NULL, next_retry_at=NULL, updated_at=?1
             WHERE key=?2",
            rusqlite::params![now, key],
        )?;
        info!(%key, "message sent");
        Ok(())
    }

    /// Transient failure: bump the attempt count and return the message to
    /// the queue, not to be retried before `next_retry_at`.
    pub fn mark_retry(&self, key: &str, error: &str, next_retry_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE outbox SET status='queued', attempts=attempts+1,
                last_error=?1, next_retry_at=?2, updated_at=?3
             WHERE key=?4",
            rusqlite::params![error, next_retry_at.to_rfc3339(), now, key],
        )?;
        warn!(%key, %error, retry_at = %next_retry_at.to_rfc3339(), "delivery failed, will retry");
        Ok(())
    }

    /// Permanent failure (validation, rejected recipient) — terminal.
    pub fn mark_failed(&self, key: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE outbox SET status='failed', attempts=attempts+1,
                last_error=?1, next_retry_at=NULL, updated_at=?2
             WHERE key=?3",
            rusqlite::params![error, now, key],
        )?;
        warn!(%key, %error, "delivery failed permanently");
        Ok(())
    }

    /// Retry budget exhausted — terminal, reported but never retried
    /// automatically.
    pub fn mark_dead(&self, key: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE outbox SET status='dead', attempts=attempts+1,
                last_error=?1, next_retry_at=NULL, updated_at=?2
             WHERE key=?3",
            rusqlite::params![error, now, key],
        )?;
        warn!(%key, %error, "message dead after exhausting retries");
        Ok(())
    }

    /// Drop a not-yet-sent message (appointment cancelled). Only `queued`
    /// and `sending` rows are affected; a message that already went out
    /// stays `sent`.
    pub fn mark_skipped(&self, key: &str, reason: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE outbox SET status='skipped', last_error=?1, next_retry_at=NULL, updated_at=?2
             WHERE key=?3 AND status IN ('queued','sending')",
            rusqlite::params![reason, now, key],
        )?;
        Ok(())
    }

    /// Skip every still-queued message of one appointment. Returns the
    /// number of rows affected.
    pub fn skip_for_appointment(&self, appointment_id: &str, reason: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE outbox SET status='skipped', last_error=?1, next_retry_at=NULL, updated_at=?2
             WHERE appointment_id=?3 AND status IN ('queued','sending')",
            rusqlite::params![reason, now, appointment_id],
        )?;
        if n > 0 {
            info!(appointment_id, count = n, "queued messages skipped for cancelled appointment");
        }
        Ok(n)
    }

    /// Fetch one message by its idempotency key.
    pub fn get(&self, key: &str) -> Result<Option<OutboxMessage>> {
        let conn = self.conn.lock().unwrap();
        get_locked(&conn, key)
    }

    /// All messages whose key starts with `prefix` — used to reconcile a
    /// reminder's status from the channel messages it fanned out to.
    pub fn by_key_prefix(&self, prefix: &str) -> Result<Vec<OutboxMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM outbox WHERE key LIKE ?1 ORDER BY key"
        ))?;
        let rows: Vec<OutboxMessage> = stmt
            .query_map([format!("{prefix}%")], map_row)?
            .filter_map(|r| r.ok())
            .filter_map(|raw| parse_row(raw).ok())
            .collect();
        Ok(rows)
    }

    /// Aggregate counters for monitoring.
    pub fn stats(&self) -> Result<OutboxStats> {
        let conn = self.conn.lock().unwrap();
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    SUM(status='queued'), SUM(status='sending'), SUM(status='sent'),
                    SUM(status='failed'), SUM(status='dead'), SUM(status='skipped'),
                    SUM(channel='email'), SUM(channel='sms'),
                    COALESCE(AVG(attempts), 0.0)
             FROM outbox",
            [],
            |row| {
                Ok(OutboxStats {
                    total: row.get::<_, i64>(0)? as u64,
                    queued: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as u64,
                    sending: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                    sent: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as u64,
                    failed: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as u64,
                    dead: row.get::<_, Option<i64>>(5)?.unwrap_or(0) as u64,
                    skipped: row.get::<_, Option<i64>>(6)?.unwrap_or(0) as u64,
                    email: row.get::<_, Option<i64>>(7)?.unwrap_or(0) as u64,
                    sms: row.get::<_, Option<i64>>(8)?.unwrap_or(0) as u64,
                    avg_attempts: row.get(9)?,
                })
            },
        )?;
        Ok(stats)
    }
}

type RawRow = (
    String,         // key
    String,         // id
    String,         // appointment_id
    String,         // channel
    String,         // recipient
    Option<String>, // subject
    String,         // body
    String,         // status
    u32,            // attempts
    Option<String>, // last_error
    Option<String>, // next_retry_at
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
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
    ))
}

fn parse_row(raw: RawRow) -> Result<OutboxMessage> {
    let (
        key,
        id,
        appointment_id,
        channel,
        recipient,
        subject,
        body,
        status,
        attempts,
        last_error,
        next_retry_at,
        created_at,
        updated_at,
    ) = raw;
    Ok(OutboxMessage {
        channel: channel
            .parse()
            .map_err(|e: String| OutboxError::CorruptRow(format!("{key}: {e}")))?,
        status: status
            .parse()
            .map_err(|e: String| OutboxError::CorruptRow(format!("{key}: {e}")))?,
        key,
        id,
        appointment_id,
        recipient,
        subject,
        body,
        attempts,
        last_error,
        next_retry_at,
        created_at,
        updated_at,
    })
}

fn get_locked(conn: &Connection, key: &str) -> Result<Option<OutboxMessage>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM outbox WHERE key = ?1"
    ))?;
    let raw = stmt
        .query_map([key], map_row)?
        .next()
        .transpose()?;
    raw.map(parse_row).transpose()
}
