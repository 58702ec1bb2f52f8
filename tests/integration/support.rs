//! Scripted completion transport and fixtures.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use codeforge::models::events::StreamEvent;
use codeforge::services::prompts::{CODE_GEN_PROMPT, PLAN_SYSTEM_PROMPT};
use codeforge::{AppConfig, AppState, EventStream};
use codeforge_llm::{
    CompletionTransport, LlmError, LlmRequestOptions, LlmResult, Message, TextStream,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Which pipeline step a request belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Plan,
    File(String),
    Legacy,
    Other,
}

pub fn step_of(messages: &[Message]) -> Step {
    let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
    if system.starts_with(PLAN_SYSTEM_PROMPT) {
        return Step::Plan;
    }
    if system.starts_with(CODE_GEN_PROMPT) {
        return Step::Legacy;
    }
    let user = messages.last().map(|m| m.content.as_str()).unwrap_or("");
    match user.split("GENERATE FILE: ").nth(1) {
        Some(rest) => Step::File(rest.lines().next().unwrap_or("").trim().to_string()),
        None => Step::Other,
    }
}

type Responder = dyn Fn(&Step, &str) -> LlmResult<String> + Send + Sync;

/// Transport whose answers come from a closure over (step, model).
///
/// Streams deliver the answer in three chunks. A stalling transport then
/// keeps the stream open without ever finishing it.
pub struct ScriptedTransport {
    respond: Box<Responder>,
    calls: Mutex<Vec<(Step, String)>>,
    stall: bool,
    held: Mutex<Vec<mpsc::Sender<LlmResult<String>>>>,
}

impl ScriptedTransport {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&Step, &str) -> LlmResult<String> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
            stall: false,
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn calls(&self) -> Vec<(Step, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, model: &str, messages: &[Message]) -> LlmResult<String> {
        let step = step_of(messages);
        self.calls
            .lock()
            .unwrap()
            .push((step.clone(), model.to_string()));
        (self.respond)(&step, model)
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(
        &self,
        _credential: &str,
        model: &str,
        messages: &[Message],
        _options: &LlmRequestOptions,
    ) -> LlmResult<String> {
        self.answer(model, messages)
    }

    async fn stream(
        &self,
        _credential: &str,
        model: &str,
        messages: &[Message],
        _options: &LlmRequestOptions,
    ) -> LlmResult<TextStream> {
        let (tx, rx) = mpsc::channel(16);
        match self.answer(model, messages) {
            Ok(text) => {
                let chars: Vec<char> = text.chars().collect();
                let third = (chars.len() / 3).max(1);
                for piece in chars.chunks(third) {
                    let _ = tx.send(Ok(piece.iter().collect())).await;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
            }
        }
        if self.stall {
            self.held.lock().unwrap().push(tx);
        }
        Ok(TextStream::new(rx, CancellationToken::new()))
    }
}

pub const TODO_PLAN: &str = r#"```json
{
  "projectTitle": "Todo App",
  "explanation": "A small task tracker.",
  "files": [
    {"path": "/App.js", "description": "Root component rendering the list"},
    {"path": "/components/TodoList.js", "description": "List of todos with add and toggle"},
    {"path": "/index.css", "description": "Tailwind directives"}
  ]
}
```"#;

pub const TODO_PATHS: [&str; 3] = ["/App.js", "/components/TodoList.js", "/index.css"];

pub fn file_body(path: &str) -> String {
    format!(
        "```jsx\n// {}\nexport default function Component() {{\n  return <div className=\"p-4\">todo</div>;\n}}\n```",
        path
    )
}

pub fn server_error() -> LlmError {
    LlmError::Http {
        status: 500,
        body: "upstream exploded".to_string(),
    }
}

pub fn config_with_keys(keys: &[&str]) -> AppConfig {
    let mut config = AppConfig::default();
    config.api_keys = keys.iter().map(|k| k.to_string()).collect();
    config
}

pub fn state_for(config: &AppConfig, transport: Arc<ScriptedTransport>) -> AppState {
    AppState::with_transport(config, transport)
}

/// Drain a run, dropping pings
pub async fn drain(stream: EventStream) -> Vec<StreamEvent> {
    stream
        .collect()
        .await
        .into_iter()
        .filter(|e| !matches!(e, StreamEvent::Ping { .. }))
        .collect()
}
