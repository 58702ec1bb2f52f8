//! Stream Delta Events
//!
//! What a decoded line of a streamed completion can carry. The decoding
//! itself happens in the adapters of `codeforge-llm`; the transport keeps
//! only answer text and turns inline errors into failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One decoded piece of a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaEvent {
    /// Answer text
    TextDelta { content: String },

    /// Reasoning text, reported by reasoning models in a separate field.
    /// Never part of the answer.
    ThinkingDelta { content: String },

    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },

    /// Error object injected by the gateway mid-stream
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// finish_reason was set
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },

    /// `data: [DONE]`
    Done,
}

impl DeltaEvent {
    pub fn text(content: impl Into<String>) -> Self {
        DeltaEvent::TextDelta {
            content: content.into(),
        }
    }

    /// Answer text carried by this event, if any. Empty deltas count as none.
    pub fn answer_text(&self) -> Option<&str> {
        match self {
            DeltaEvent::TextDelta { content } if !content.is_empty() => Some(content),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, DeltaEvent::Done)
    }
}

/// A line the adapter could not decode
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Malformed stream payload: {0}")]
    Malformed(String),
}

/// Decodes provider stream lines into [`DeltaEvent`]s.
pub trait StreamAdapter: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// One line may yield zero or more events.
    fn adapt(&mut self, line: &str) -> Result<Vec<DeltaEvent>, AdapterError>;
}
