//! OpenRouter Transport
//!
//! `CompletionTransport` over an OpenAI-compatible `chat/completions`
//! endpoint. Streaming attempts run in a spawned task that races every
//! network read against two timers: a first-byte ceiling covering request
//! send through the first body byte, and an absolute ceiling for the whole
//! attempt.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use codeforge_core::proxy::ProxyConfig;
use codeforge_core::streaming::{DeltaEvent, StreamAdapter};

use crate::http_client::build_http_client;
use crate::provider::{parse_http_error, parse_inline_error, CompletionTransport, TextStream};
use crate::streaming_adapters::OpenAIAdapter;
use crate::types::{LlmError, LlmRequestOptions, LlmResult, Message, TimeoutStage};

/// Default OpenRouter API endpoint
pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Absolute ceiling for one streamed attempt.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(90);
/// Ceiling from request send until the first body byte.
pub const DEFAULT_FIRST_BYTE_TIMEOUT: Duration = Duration::from_secs(25);
/// Absolute ceiling for one non-streamed attempt.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    /// Sent as `HTTP-Referer` for gateway attribution.
    pub site_url: String,
    /// Sent as `X-Title`.
    pub site_name: String,
    pub stream_timeout: Duration,
    pub first_byte_timeout: Duration,
    pub completion_timeout: Duration,
    pub proxy: Option<ProxyConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: OPENROUTER_API_URL.to_string(),
            site_url: "http://localhost:3000".to_string(),
            site_name: "Codeforge".to_string(),
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            first_byte_timeout: DEFAULT_FIRST_BYTE_TIMEOUT,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            proxy: None,
        }
    }
}

/// OpenRouter-compatible completion transport
pub struct OpenRouterTransport {
    config: TransportConfig,
    client: reqwest::Client,
}

impl OpenRouterTransport {
    /// Create a new transport with the given configuration
    pub fn new(config: TransportConfig) -> LlmResult<Self> {
        let client = build_http_client(config.proxy.as_ref())?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Build the request body for the API
    fn build_request_body(
        &self,
        model: &str,
        messages: &[Message],
        options: &LlmRequestOptions,
        stream: bool,
    ) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }

    fn request(&self, credential: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(&self.config.base_url)
            .header("Authorization", format!("Bearer {}", credential))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", &self.config.site_url)
            .header("X-Title", &self.config.site_name)
            .json(body)
    }
}

fn network_error(err: reqwest::Error) -> LlmError {
    LlmError::NetworkError {
        message: err.to_string(),
    }
}

#[async_trait]
impl CompletionTransport for OpenRouterTransport {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn complete(
        &self,
        credential: &str,
        model: &str,
        messages: &[Message],
        options: &LlmRequestOptions,
    ) -> LlmResult<String> {
        let deadline = Instant::now() + options.timeout.unwrap_or(self.config.completion_timeout);
        let body = self.build_request_body(model, messages, options, false);
        let request = self.request(credential, &body);

        let exchange = async {
            let response = request.send().await.map_err(network_error)?;
            let status = response.status().as_u16();
            let body_text = response.text().await.map_err(network_error)?;

            if !(200..300).contains(&status) {
                return Err(parse_http_error(status, &body_text));
            }

            let parsed: CompletionResponse =
                serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                    message: format!("Failed to parse response: {}", e),
                })?;

            if let Some(err) = parsed.error {
                return Err(parse_inline_error(&err.message, err.code().as_deref()));
            }

            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message)
                .and_then(|m| m.content)
                .unwrap_or_default();
            if content.trim().is_empty() {
                return Err(LlmError::EmptyResponse);
            }
            Ok(content)
        };

        match timeout_at(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                stage: TimeoutStage::Total,
            }),
        }
    }

    async fn stream(
        &self,
        credential: &str,
        model: &str,
        messages: &[Message],
        options: &LlmRequestOptions,
    ) -> LlmResult<TextStream> {
        let started = Instant::now();
        let deadline = started + options.timeout.unwrap_or(self.config.stream_timeout);
        let first_byte_deadline = (started + self.config.first_byte_timeout).min(deadline);

        let body = self.build_request_body(model, messages, options, true);
        let request = self.request(credential, &body);

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let model = model.to_string();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = task_cancel.cancelled() => {
                    debug!(model = %model, "stream cancelled by consumer");
                    return;
                }
                outcome = pump_stream(request, &tx, &model, deadline, first_byte_deadline) => {
                    outcome
                }
            };
            if let Err(err) = outcome {
                let _ = tx.send(Err(err)).await;
            }
        });

        Ok(TextStream::new(rx, cancel))
    }
}

/// Whether to keep reading after a line has been dispatched.
enum Flow {
    Continue,
    Stop,
}

/// Read the SSE body, forwarding text deltas until `[DONE]`, end of body, an
/// in-stream error or a timer.
async fn pump_stream(
    request: reqwest::RequestBuilder,
    tx: &mpsc::Sender<LlmResult<String>>,
    model: &str,
    deadline: Instant,
    first_byte_deadline: Instant,
) -> LlmResult<()> {
    let response = match timeout_at(first_byte_deadline, request.send()).await {
        Ok(response) => response.map_err(network_error)?,
        Err(_) => {
            return Err(LlmError::Timeout {
                stage: TimeoutStage::FirstByte,
            })
        }
    };

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = match timeout_at(deadline, response.text()).await {
            Ok(Ok(body)) => body,
            _ => String::new(),
        };
        return Err(parse_http_error(status, &body));
    }

    let mut adapter = OpenAIAdapter::new(model);
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut got_first_byte = false;
    let mut delivered = 0usize;

    loop {
        let (limit, stage) = if got_first_byte {
            (deadline, TimeoutStage::Total)
        } else {
            (first_byte_deadline, TimeoutStage::FirstByte)
        };
        let next = match timeout_at(limit, stream.next()).await {
            Ok(next) => next,
            Err(_) => return Err(LlmError::Timeout { stage }),
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(network_error)?;
        if chunk.is_empty() {
            continue;
        }
        got_first_byte = true;
        buffer.extend_from_slice(&chunk);

        // Process complete lines
        while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            if let Flow::Stop = dispatch_line(&mut adapter, &line, tx, &mut delivered).await? {
                return finish(delivered);
            }
        }
    }

    if !buffer.is_empty() {
        let line = String::from_utf8_lossy(&buffer).into_owned();
        dispatch_line(&mut adapter, &line, tx, &mut delivered).await?;
    }
    finish(delivered)
}

async fn dispatch_line(
    adapter: &mut OpenAIAdapter,
    line: &str,
    tx: &mpsc::Sender<LlmResult<String>>,
    delivered: &mut usize,
) -> LlmResult<Flow> {
    let events = match adapter.adapt(line) {
        Ok(events) => events,
        Err(e) => {
            debug!(error = %e, "skipping unparsable stream line");
            return Ok(Flow::Continue);
        }
    };

    for event in events {
        if let DeltaEvent::Error { message, code } = &event {
            return Err(parse_inline_error(message, code.as_deref()));
        }
        if event.is_done() {
            return Ok(Flow::Stop);
        }
        if let Some(text) = event.answer_text() {
            *delivered += 1;
            if tx.send(Ok(text.to_string())).await.is_err() {
                // Consumer went away.
                return Ok(Flow::Stop);
            }
        }
    }
    Ok(Flow::Continue)
}

fn finish(delivered: usize) -> LlmResult<()> {
    if delivered == 0 {
        Err(LlmError::EmptyResponse)
    } else {
        Ok(())
    }
}

/// Non-streaming response format
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl ErrorBody {
    fn code(&self) -> Option<String> {
        self.code.as_ref().map(|c| match c {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}
