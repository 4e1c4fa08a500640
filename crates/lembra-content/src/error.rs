use thiserror::Error;

/// Raised when a template context is missing required data.
///
/// This is a permanent validation error: the caller surfaces it without
/// enqueueing anything, so no partial or garbled content is ever dispatched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateDataError {
    /// A required context field is absent or blank.
    #[error("Missing template field: {field}")]
    MissingField { field: &'static str },
}

pub type Result<T> = std::result::Result<T, TemplateDataError>;
