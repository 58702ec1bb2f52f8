//! Completion Transport Trait
//!
//! Defines the interface every completion backend implements, the
//! cancellable text stream it hands back, and the shared HTTP error
//! classification.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{LlmError, LlmRequestOptions, LlmResult, Message};

/// Upstream error bodies are cut to this many characters.
pub const MAX_ERROR_BODY_CHARS: usize = 300;

/// Body wording that points at the credential (quota, credit, billing).
const CREDENTIAL_MARKERS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "credits",
    "quota",
    "billing",
    "payment required",
];

/// Body wording that points at the model, not the credential.
const MODEL_MARKERS: &[&str] = &[
    "no endpoints found",
    "model is overloaded",
    "model not found",
    "this model",
    "upstream",
];

/// A single completion backend.
///
/// One call is one attempt against one (credential, model) pair; retries and
/// fallback live a layer above.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Returns the transport name for logging.
    fn name(&self) -> &'static str;

    /// Send the request and wait for the whole answer.
    async fn complete(
        &self,
        credential: &str,
        model: &str,
        messages: &[Message],
        options: &LlmRequestOptions,
    ) -> LlmResult<String>;

    /// Start a streamed completion.
    ///
    /// Transport failures (HTTP status, timeouts, empty streams) arrive as an
    /// `Err` item on the returned stream.
    async fn stream(
        &self,
        credential: &str,
        model: &str,
        messages: &[Message],
        options: &LlmRequestOptions,
    ) -> LlmResult<TextStream>;
}

/// Ordered text deltas from one streamed completion.
///
/// Dropping the stream (or calling [`TextStream::cancel`]) aborts the
/// producer's network read.
#[derive(Debug)]
pub struct TextStream {
    rx: mpsc::Receiver<LlmResult<String>>,
    cancel: CancellationToken,
    pending: Option<String>,
}

impl TextStream {
    pub fn new(rx: mpsc::Receiver<LlmResult<String>>, cancel: CancellationToken) -> Self {
        Self {
            rx,
            cancel,
            pending: None,
        }
    }

    /// Put an already-consumed first delta back in front of the stream.
    pub fn replay(mut self, first: String) -> Self {
        self.pending = Some(first);
        self
    }

    /// Next delta, an error that ends the stream, or `None` when finished.
    pub async fn next(&mut self) -> Option<LlmResult<String>> {
        if let Some(first) = self.pending.take() {
            return Some(Ok(first));
        }
        self.rx.recv().await
    }

    /// Concatenate every remaining delta.
    pub async fn collect_text(mut self) -> LlmResult<String> {
        let mut text = String::new();
        while let Some(delta) = self.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for TextStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Whether an error text reads like a quota/credit/rate-limit rejection of
/// the credential, as opposed to a model-side problem.
pub fn is_rate_limit_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    CREDENTIAL_MARKERS.iter().any(|m| lower.contains(m))
        && !MODEL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Cut an upstream body to [`MAX_ERROR_BODY_CHARS`] characters.
pub fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Helper function to parse HTTP error status codes
pub fn parse_http_error(status: u16, body: &str) -> LlmError {
    let body = truncate_body(body);
    if matches!(status, 402 | 429) || is_rate_limit_text(&body) {
        LlmError::RateLimited {
            status: Some(status),
            message: body,
        }
    } else {
        LlmError::Http { status, body }
    }
}

/// Classify an error object delivered inside a 200 response or stream.
pub fn parse_inline_error(message: &str, code: Option<&str>) -> LlmError {
    let status = code.and_then(|c| c.trim().parse::<u16>().ok());
    match status {
        Some(s) if s >= 400 => parse_http_error(s, message),
        _ if is_rate_limit_text(message) => LlmError::RateLimited {
            status: None,
            message: truncate_body(message),
        },
        _ => LlmError::Other {
            message: truncate_body(message),
        },
    }
}
