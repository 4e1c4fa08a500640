use thiserror::Error;

/// Errors that can occur within the outbox subsystem.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value (status, channel) could not be parsed back.
    #[error("Corrupt outbox row: {0}")]
    CorruptRow(String),
}

pub type Result<T> = std::result::Result<T, OutboxError>;
