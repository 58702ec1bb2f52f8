//! OpenAI-Compatible SSE Adapter
//!
//! Decodes `data:` lines of an OpenAI-style chat completion stream. Handles
//! the separate reasoning field that reasoning models emit on OpenRouter and
//! error objects that the gateway injects mid-stream.

use codeforge_core::streaming::{AdapterError, DeltaEvent, StreamAdapter};
use serde::Deserialize;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<InlineError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct InlineError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Adapter for OpenAI-compatible SSE
pub struct OpenAIAdapter {
    model: String,
}

impl OpenAIAdapter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl StreamAdapter for OpenAIAdapter {
    fn provider_name(&self) -> &'static str {
        "openrouter"
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<DeltaEvent>, AdapterError> {
        let trimmed = input.trim();

        // Blank lines, `:` keepalive comments and other SSE fields carry no data.
        let Some(payload) = trimmed.strip_prefix(DATA_PREFIX) else {
            return Ok(vec![]);
        };
        let payload = payload.trim_start();

        if payload.is_empty() {
            return Ok(vec![]);
        }
        if payload == DONE_SENTINEL {
            return Ok(vec![DeltaEvent::Done]);
        }

        let event: ChunkEvent =
            serde_json::from_str(payload).map_err(|e| AdapterError::Malformed(e.to_string()))?;

        if let Some(err) = event.error {
            let code = err.code.map(|c| match c {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
            return Ok(vec![DeltaEvent::Error {
                message: err.message,
                code,
            }]);
        }

        let mut events = vec![];

        for choice in event.choices {
            if let Some(delta) = choice.delta {
                if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning) {
                    if !reasoning.is_empty() {
                        events.push(DeltaEvent::ThinkingDelta { content: reasoning });
                    }
                }
                if let Some(content) = delta.content {
                    if !content.is_empty() {
                        events.push(DeltaEvent::TextDelta { content });
                    }
                }
            }

            // Some gateways put the last delta and the finish reason in one chunk.
            if let Some(finish_reason) = choice.finish_reason {
                events.push(DeltaEvent::Complete {
                    stop_reason: Some(finish_reason),
                });
            }
        }

        if let Some(usage) = event.usage {
            events.push(DeltaEvent::Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }

        Ok(events)
    }
}
