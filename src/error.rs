//! Error types for Aerostream

use thiserror::Error;

use crate::schema::ValidationError;

/// Errors that can occur while merging, averaging or looking up series data
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate channel name: {0}")]
    DuplicateName(String),

    #[error("Unknown channel '{name}' (known channels: {known:?})")]
    UnknownChannel { name: String, known: Vec<String> },

    #[error("Unknown stream '{name}' (known streams: {known:?})")]
    UnknownStream { name: String, known: Vec<String> },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid raw batch: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to parse input: {0}")]
    Parse(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl StreamError {
    pub(crate) fn shape(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        StreamError::ShapeMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}
