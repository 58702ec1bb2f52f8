//! Core Error Types
//!
//! Failures of the output recovery layer. The provider crate and the
//! application crate have their own enums (`LlmError`, `AppError`); the
//! application wraps this one transparently.

use thiserror::Error;

const PREVIEW_CHARS: usize = 120;

/// Core error type for the Codeforge workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// No recovery stage produced a JSON document
    #[error("No JSON could be recovered from {chars} chars of output")]
    Unrecoverable { chars: usize, preview: String },

    /// A document was recovered but lacks the expected content
    #[error("Recovered JSON has no usable \"{0}\"")]
    MissingKey(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Unrecoverable output, keeping a short preview for logs
    pub fn unrecoverable(text: &str) -> Self {
        Self::Unrecoverable {
            chars: text.chars().count(),
            preview: text.chars().take(PREVIEW_CHARS).collect(),
        }
    }

    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey(key.into())
    }
}

impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
