//! Boundary validation errors.

use thiserror::Error;

/// Result type used when decoding inbound events.
pub type EventResult<T> = Result<T, EventError>;

/// Raised when an inbound payload cannot be turned into a typed event.
///
/// Keep this focused on deterministic input failures. Transport and storage
/// concerns have their own error types in the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The body is not a JSON object, or a field has the wrong JSON type.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// An identifier was empty or unparsable.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl EventError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
