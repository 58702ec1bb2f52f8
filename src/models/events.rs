//! Pipeline Stream Events
//!
//! The caller-facing event protocol. Each event is one JSON object framed as
//! an SSE `data:` line:
//!
//! - `{"chunk": "..."}`
//! - `{"phase": "generating", "status": "...", "currentFile"?, "progress"?, "total"?, "plan"?}`
//! - `{"final": {...artifact...}, "done": true}`
//! - `{"error": "...", "rawError"?: "...", "done": true}`
//! - `{"ping": true}`

use serde::{Deserialize, Serialize};

use crate::models::artifact::{FilePlanEntry, ProjectArtifact};
use crate::services::phase::GenerationPhase;

const DATA_PREFIX: &str = "data:";

/// One event of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Final {
        #[serde(rename = "final")]
        artifact: ProjectArtifact,
        done: bool,
    },
    Error {
        error: String,
        #[serde(rename = "rawError", default, skip_serializing_if = "Option::is_none")]
        raw_error: Option<String>,
        #[serde(default = "done_true")]
        done: bool,
    },
    Phase {
        phase: GenerationPhase,
        status: String,
        #[serde(rename = "currentFile", default, skip_serializing_if = "Option::is_none")]
        current_file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan: Option<Vec<FilePlanEntry>>,
    },
    Chunk {
        chunk: String,
    },
    Ping {
        ping: bool,
    },
}

fn done_true() -> bool {
    true
}

impl StreamEvent {
    pub fn final_result(artifact: ProjectArtifact) -> Self {
        StreamEvent::Final {
            artifact,
            done: true,
        }
    }

    pub fn error(message: impl Into<String>, raw_error: Option<String>) -> Self {
        StreamEvent::Error {
            error: message.into(),
            raw_error,
            done: true,
        }
    }

    /// Phase update without file progress
    pub fn phase(phase: GenerationPhase, status: impl Into<String>) -> Self {
        StreamEvent::Phase {
            phase,
            status: status.into(),
            current_file: None,
            progress: None,
            total: None,
            plan: None,
        }
    }

    pub fn planned(status: impl Into<String>, plan: Vec<FilePlanEntry>) -> Self {
        let total = plan.len();
        StreamEvent::Phase {
            phase: GenerationPhase::Planned,
            status: status.into(),
            current_file: None,
            progress: None,
            total: Some(total),
            plan: Some(plan),
        }
    }

    /// Progress is 1-based
    pub fn generating(current_file: impl Into<String>, progress: usize, total: usize) -> Self {
        let current_file = current_file.into();
        StreamEvent::Phase {
            phase: GenerationPhase::Generating,
            status: format!("Generating {} ({}/{})", current_file, progress, total),
            current_file: Some(current_file),
            progress: Some(progress),
            total: Some(total),
            plan: None,
        }
    }

    pub fn chunk(text: impl Into<String>) -> Self {
        StreamEvent::Chunk { chunk: text.into() }
    }

    pub fn ping() -> Self {
        StreamEvent::Ping { ping: true }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Final { .. } | StreamEvent::Error { .. })
    }

    pub fn to_json(&self) -> String {
        // Every variant serializes to a JSON object; serde_json cannot fail here.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// SSE frame: `data: <json>\n\n`
    pub fn to_sse(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}

/// Incremental decoder for an SSE byte stream of [`StreamEvent`]s.
///
/// Bytes may be split anywhere, including inside a UTF-8 sequence. Lines
/// that are not `data:` lines, or whose payload is not a known event, are
/// skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every event completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the byte stream ends
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

fn decode_line(line: &[u8]) -> Option<StreamEvent> {
    let line = String::from_utf8_lossy(line);
    let payload = line.trim().strip_prefix(DATA_PREFIX)?.trim_start();
    if payload.is_empty() {
        return None;
    }
    serde_json::from_str(payload).ok()
}
