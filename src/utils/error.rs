//! Application Errors
//!
//! Raw provider text never reaches a caller as the primary message: every
//! error is mapped to an [`ErrorCategory`] with a fixed user-safe message,
//! and the raw text travels separately as debug detail.

use codeforge_core::CoreError;
use codeforge_llm::LlmError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Provider layer errors
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Core errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The pipeline finished without a usable artifact
    #[error("Generation error: {0}")]
    Generation(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// The caller went away or cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled | AppError::Llm(LlmError::Cancelled))
    }

    /// User-facing category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Config(_) | AppError::Llm(LlmError::NoCredentials) => {
                ErrorCategory::Misconfiguration
            }
            AppError::Llm(LlmError::Busy) | AppError::Llm(LlmError::RateLimited { .. }) => {
                ErrorCategory::Busy
            }
            _ => ErrorCategory::classify(&self.to_string()),
        }
    }

    /// Sanitized message safe to show to an end user
    pub fn user_message(&self) -> String {
        match self {
            AppError::Config(_) | AppError::Llm(LlmError::NoCredentials) => {
                ErrorCategory::Misconfiguration.message().to_string()
            }
            AppError::Llm(LlmError::Busy) | AppError::Llm(LlmError::RateLimited { .. }) => {
                ErrorCategory::Busy.message().to_string()
            }
            _ => sanitize(&self.to_string()),
        }
    }
}

/// Convert AppError to a string for API responses
impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}

/// User-safe error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limits, exhausted credits, timeouts: try again later
    Busy,
    /// The model output could not be turned into a project
    Malformed,
    Network,
    /// Deployment problem, such as missing API keys
    Misconfiguration,
    Generic,
}

const MISCONFIGURATION_MARKERS: &[&str] = &[
    "no openrouter api keys",
    "api key",
    "configuration error",
    "unauthorized",
    "http 401",
];
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "429",
    "quota",
    "exceeded",
    "temporarily",
    "busy",
];
const CREDIT_MARKERS: &[&str] = &["credit", "insufficient", "billing", "402"];
const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "deadline"];
const NETWORK_MARKERS: &[&str] = &[
    "network",
    "connection refused",
    "econnrefused",
    "fetch failed",
    "dns",
];
const MALFORMED_MARKERS: &[&str] = &[
    "json",
    "parse",
    "malformed",
    "no files produced",
    "empty response",
];

const BUSY_MESSAGE: &str =
    "Our AI servers are busy right now. Please wait a moment and try again.";
const CREDITS_MESSAGE: &str =
    "Our AI servers are temporarily unavailable. Please try again shortly.";
const TIMEOUT_MESSAGE: &str =
    "The request took too long. Please try again with a simpler prompt.";
const NETWORK_MESSAGE: &str = "Network error. Please check your connection and try again.";
const MALFORMED_MESSAGE: &str = "The AI response was malformed. Please try again.";
const MISCONFIGURATION_MESSAGE: &str =
    "The AI service is not configured correctly. Please contact the site owner.";
const GENERIC_MESSAGE: &str = "Something went wrong. Please try again.";

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| haystack.contains(m))
}

impl ErrorCategory {
    /// Classify raw error text
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.trim().is_empty() {
            return ErrorCategory::Generic;
        }
        if contains_any(&lower, MISCONFIGURATION_MARKERS) {
            ErrorCategory::Misconfiguration
        } else if contains_any(&lower, RATE_LIMIT_MARKERS)
            || contains_any(&lower, CREDIT_MARKERS)
            || contains_any(&lower, TIMEOUT_MARKERS)
        {
            ErrorCategory::Busy
        } else if contains_any(&lower, NETWORK_MARKERS) {
            ErrorCategory::Network
        } else if contains_any(&lower, MALFORMED_MARKERS) {
            ErrorCategory::Malformed
        } else {
            ErrorCategory::Generic
        }
    }

    /// The canonical message for this category
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCategory::Busy => BUSY_MESSAGE,
            ErrorCategory::Malformed => MALFORMED_MESSAGE,
            ErrorCategory::Network => NETWORK_MESSAGE,
            ErrorCategory::Misconfiguration => MISCONFIGURATION_MESSAGE,
            ErrorCategory::Generic => GENERIC_MESSAGE,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Busy => write!(f, "busy"),
            ErrorCategory::Malformed => write!(f, "malformed"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Misconfiguration => write!(f, "misconfiguration"),
            ErrorCategory::Generic => write!(f, "generic"),
        }
    }
}

/// Map raw error text to a user-safe message.
///
/// Busy errors keep a more specific phrasing for exhausted credits and for
/// timeouts.
pub fn sanitize(raw: &str) -> String {
    let category = ErrorCategory::classify(raw);
    if category == ErrorCategory::Busy {
        let lower = raw.to_lowercase();
        if contains_any(&lower, RATE_LIMIT_MARKERS) {
            return BUSY_MESSAGE.to_string();
        }
        if contains_any(&lower, CREDIT_MARKERS) {
            return CREDITS_MESSAGE.to_string();
        }
        return TIMEOUT_MESSAGE.to_string();
    }
    category.message().to_string()
}
