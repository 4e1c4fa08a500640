use rusqlite::Connection;

use crate::error::Result;

/// Timestamp format for clinic-local instants stored in TEXT columns.
/// Lexicographic order matches chronological order, so SQL comparisons
/// against these strings are safe.
pub const LOCAL_FMT: &str = "%Y-%m-%dT%H:%M:%S";

/// Initialise the reminder schema in `conn`.
///
/// One row per (appointment, kind); rows are never deleted — they are the
/// audit trail of what was (or was not) sent and why.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS reminders (
            appointment_id TEXT NOT NULL,
            kind           TEXT NOT NULL,   -- 'confirmation' | '24h' | '2h' | …
            target_at      TEXT NOT NULL,   -- clinic-local ISO-8601
            status         TEXT NOT NULL DEFAULT 'pending',
            sent_at        TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL,
            PRIMARY KEY (appointment_id, kind)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_reminders_status ON reminders (status);
        ",
    )?;
    Ok(())
}
