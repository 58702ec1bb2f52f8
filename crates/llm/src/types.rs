//! LLM Types
//!
//! Message, credential, request-option and error types shared by the
//! completion transport and the fallback orchestrator.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    /// Chat transcripts coming from the browser label model turns `ai`.
    #[serde(alias = "ai")]
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
}

impl Message {
    /// Create a simple text message
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(MessageRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(MessageRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, text)
    }
}

/// An API key for the completion gateway.
///
/// The secret never appears in `Debug` output; logs refer to credentials by
/// their 1-based position in the pool (`key#1`).
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Log label for the credential at `index`.
pub fn credential_label(index: usize) -> String {
    format!("key#{}", index + 1)
}

/// Per-request options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmRequestOptions {
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Absolute per-attempt ceiling. The transport default applies when unset.
    pub timeout: Option<Duration>,
}

impl LlmRequestOptions {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Which timer expired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStage {
    /// Nothing arrived between sending the request and the first body byte.
    FirstByte,
    /// The attempt as a whole ran past its ceiling.
    Total,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutStage::FirstByte => write!(f, "first byte"),
            TimeoutStage::Total => write!(f, "total"),
        }
    }
}

/// Errors from the provider layer
#[derive(Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Quota, credit or rate-limit rejection tied to the credential
    RateLimited {
        status: Option<u16>,
        message: String,
    },
    /// Any other non-2xx response; body truncated
    Http { status: u16, body: String },
    /// Network/connection error
    NetworkError { message: String },
    /// A timer expired before the attempt finished
    Timeout { stage: TimeoutStage },
    /// The model finished without producing any text
    EmptyResponse,
    /// Response parsing error
    ParseError { message: String },
    /// The caller cancelled the request
    Cancelled,
    /// No API keys are configured
    NoCredentials,
    /// Every combo failed and the last failure was a rate limit
    Busy,
    /// Other error
    Other { message: String },
}

impl LlmError {
    /// Whether a higher layer may try the request again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::Cancelled | LlmError::NoCredentials)
    }

    /// Whether this failure counts against the credential that produced it.
    pub fn exhausts_credential(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::Http { status, .. } => matches!(status, 402 | 429),
            _ => false,
        }
    }

    /// Upstream HTTP status, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::RateLimited { status, .. } => *status,
            LlmError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::RateLimited { status, message } => match status {
                Some(s) => write!(f, "Rate limited (HTTP {}): {}", s, message),
                None => write!(f, "Rate limited: {}", message),
            },
            LlmError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            LlmError::NetworkError { message } => write!(f, "Network error: {}", message),
            LlmError::Timeout { stage } => write!(f, "Request timed out ({} limit)", stage),
            LlmError::EmptyResponse => write!(f, "Empty response from model"),
            LlmError::ParseError { message } => write!(f, "Parse error: {}", message),
            LlmError::Cancelled => write!(f, "Request cancelled"),
            LlmError::NoCredentials => write!(f, "No OpenRouter API keys configured"),
            LlmError::Busy => write!(f, "All models are busy, try again shortly"),
            LlmError::Other { message } => write!(f, "Error: {}", message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;
