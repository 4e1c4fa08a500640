use rusqlite::Connection;

use crate::error::Result;

/// Initialise the outbox schema in `conn`.
///
/// Creates the `outbox` table (idempotent) and an index on
/// `(status, next_retry_at)` so the claim query stays efficient as sent
/// rows accumulate. The `key` column carries the idempotency contract
/// `<appointment_id>:<kind>:<channel>` and must stay unique.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox (
            key            TEXT    NOT NULL PRIMARY KEY,
            id             TEXT    NOT NULL,   -- UUID of the current attempt cycle
            appointment_id TEXT    NOT NULL,
            channel        TEXT    NOT NULL,   -- 'email' | 'sms'
            recipient      TEXT    NOT NULL,
            subject        TEXT,               -- email only
            body           TEXT    NOT NULL,
            status         TEXT    NOT NULL DEFAULT 'queued',
            attempts       INTEGER NOT NULL DEFAULT 0,
            last_error     TEXT,
            next_retry_at  TEXT,               -- ISO-8601 UTC or NULL (due now)
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        ) STRICT;

        -- Efficient claiming: SELECT … WHERE status='queued' AND next_retry_at <= ?
        CREATE INDEX IF NOT EXISTS idx_outbox_status_retry ON outbox (status, next_retry_at);
        CREATE INDEX IF NOT EXISTS idx_outbox_appointment ON outbox (appointment_id);
        ",
    )?;
    Ok(())
}
