use thiserror::Error;

/// Errors that can occur within the scheduling subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Error from the outbox while enqueueing or draining.
    #[error("Outbox error: {0}")]
    Outbox(#[from] lembra_outbox::OutboxError),

    /// A stored reminder row could not be parsed back.
    #[error("Corrupt reminder row: {0}")]
    CorruptRow(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
