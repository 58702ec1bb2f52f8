//! Chat & Prompt Enhancement
//!
//! Short streamed replies on the fast roster: the builder's chat answer and
//! the prompt rewriter. Both forward deltas as they arrive and finish with a
//! single terminal event carrying the cleaned full text.

use std::sync::Arc;
use std::time::Duration;

use codeforge_core::strip_reasoning;
use codeforge_llm::{FallbackOrchestrator, LlmRequestOptions, Message, ModelRoster};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::services::prompts;
use crate::utils::error::{AppError, AppResult};

/// Chat and enhancement settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantConfig {
    #[serde(default = "default_max_tokens")]
    pub chat_max_tokens: u32,
    #[serde(default = "default_chat_temperature")]
    pub chat_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub enhance_max_tokens: u32,
    #[serde(default = "default_enhance_temperature")]
    pub enhance_temperature: f32,
    /// Ceiling for one whole reply
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_seconds: u64,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_chat_temperature() -> f32 {
    0.7
}

fn default_enhance_temperature() -> f32 {
    0.5
}

fn default_reply_timeout() -> u64 {
    60
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            chat_max_tokens: default_max_tokens(),
            chat_temperature: default_chat_temperature(),
            enhance_max_tokens: default_max_tokens(),
            enhance_temperature: default_enhance_temperature(),
            reply_timeout_seconds: default_reply_timeout(),
        }
    }
}

impl AssistantConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.chat_max_tokens == 0 || self.enhance_max_tokens == 0 {
            return Err("assistant max tokens must be non-zero".to_string());
        }
        if self.reply_timeout_seconds == 0 {
            return Err("assistant reply_timeout_seconds must be non-zero".to_string());
        }
        Ok(())
    }
}

/// What to answer
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantTask {
    /// Reply to a chat transcript
    Chat(Vec<Message>),
    /// Rewrite a rough prompt into a clear brief
    Enhance(String),
}

impl AssistantTask {
    fn label(&self) -> &'static str {
        match self {
            AssistantTask::Chat(_) => "chat",
            AssistantTask::Enhance(_) => "enhance",
        }
    }
}

/// Events of one streamed reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyEvent {
    Chunk {
        chunk: String,
    },
    Chat {
        result: String,
        done: bool,
    },
    #[serde(rename_all = "camelCase")]
    Enhanced {
        enhanced_prompt: String,
        done: bool,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
        done: bool,
    },
}

impl ReplyEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReplyEvent::Chunk { .. })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

const REPLY_CHANNEL_CAPACITY: usize = 64;

/// Streams chat and enhancement replies
pub struct Assistant {
    llm: Arc<FallbackOrchestrator>,
    roster: ModelRoster,
    config: AssistantConfig,
}

impl Assistant {
    pub fn new(llm: Arc<FallbackOrchestrator>, roster: ModelRoster) -> Self {
        Self {
            llm,
            roster,
            config: AssistantConfig::default(),
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: AssistantConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// Start a reply in a spawned task.
    ///
    /// Dropping the receiver or cancelling `cancel` aborts the upstream read.
    pub fn spawn(
        self: &Arc<Self>,
        task: AssistantTask,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ReplyEvent> {
        let (tx, rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let this = self.clone();
        tokio::spawn(async move {
            let label = task.label();
            let enhance = matches!(task, AssistantTask::Enhance(_));
            let terminal = match this.reply(task, &tx, &cancel).await {
                Ok(text) => {
                    info!(task = label, chars = text.len(), "Reply finished");
                    if enhance {
                        ReplyEvent::Enhanced {
                            enhanced_prompt: text,
                            done: true,
                        }
                    } else {
                        ReplyEvent::Chat {
                            result: text,
                            done: true,
                        }
                    }
                }
                Err(err) if err.is_cancelled() || cancel.is_cancelled() => {
                    debug!(task = label, "Reply cancelled");
                    return;
                }
                Err(err) => {
                    error!(task = label, "Reply failed: {}", err);
                    ReplyEvent::Error {
                        error: err.user_message(),
                        success: enhance.then_some(false),
                        done: true,
                    }
                }
            };
            let _ = tx.send(terminal).await;
        });
        rx
    }

    /// Stream one reply into `tx`, returning the cleaned full text.
    pub async fn reply(
        &self,
        task: AssistantTask,
        tx: &mpsc::Sender<ReplyEvent>,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let (messages, options, enhance) = match &task {
            AssistantTask::Chat(history) => {
                if history.is_empty() {
                    return Err(AppError::validation("chat transcript is empty"));
                }
                let options = LlmRequestOptions::default()
                    .with_max_tokens(self.config.chat_max_tokens)
                    .with_temperature(self.config.chat_temperature);
                (prompts::chat_messages(history), options, false)
            }
            AssistantTask::Enhance(prompt) => {
                if prompt.trim().is_empty() {
                    return Err(AppError::validation("prompt is empty"));
                }
                let options = LlmRequestOptions::default()
                    .with_max_tokens(self.config.enhance_max_tokens)
                    .with_temperature(self.config.enhance_temperature);
                (prompts::enhance_messages(prompt), options, true)
            }
        };

        let reply_cancel = cancel.child_token();
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.reply_timeout_seconds);

        let mut stream = self
            .llm
            .stream(&messages, &self.roster, &options, &reply_cancel)
            .await?;
        let mut text = String::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                next = tokio::time::timeout_at(deadline, stream.next()) => next,
            };
            let delta = match next {
                Ok(Some(delta)) => delta?,
                Ok(None) => break,
                Err(_) => {
                    reply_cancel.cancel();
                    return Err(AppError::generation("reply timed out"));
                }
            };
            text.push_str(&delta);
            if tx.send(ReplyEvent::Chunk { chunk: delta }).await.is_err() {
                reply_cancel.cancel();
                return Err(AppError::Cancelled);
            }
        }

        let cleaned = if enhance {
            clean_enhanced(&text)
        } else {
            strip_reasoning(&text).trim().to_string()
        };
        if cleaned.is_empty() {
            return Err(AppError::generation("empty response"));
        }
        Ok(cleaned)
    }
}

/// Strip reasoning, a leading label and wrapping quotes from an enhanced prompt
pub fn clean_enhanced(text: &str) -> String {
    let text = strip_reasoning(text);
    let mut text = text.trim();
    for label in ["Enhanced prompt:", "Enhanced Prompt:", "Prompt:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim_start();
            break;
        }
    }
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}'), ('\'', '\'')] {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = &text[open.len_utf8()..text.len() - close.len_utf8()];
            break;
        }
    }
    text.trim().to_string()
}
