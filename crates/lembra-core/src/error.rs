use thiserror::Error;

/// Errors raised by the core configuration and type layer.
#[derive(Debug, Error)]
pub enum LembraError {
    /// Configuration file or environment overrides could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LembraError>;
