//! Client Retry Supervisor
//!
//! Wraps one whole pipeline invocation from the caller's side. Each attempt
//! opens a fresh event stream from a [`PipelineSource`] and reads it until a
//! terminal event. Retryable outcomes (server 5xx, timeouts, "no files
//! produced", a stream that ends early) are re-issued with progressive
//! backoff. Two timers bound the whole thing: an inactivity window that
//! resets on every event, and an absolute ceiling for the entire request.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::artifact::{GenerationRequest, ProjectArtifact};
use crate::models::events::{SseDecoder, StreamEvent};
use crate::services::pipeline::{EventStream, PipelineRunner};

/// Supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupervisorConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before retry n is `backoff_seconds[n-1]`; the last value repeats
    #[serde(default = "default_backoff")]
    pub backoff_seconds: Vec<u64>,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_seconds: u64,
    #[serde(default = "default_total_timeout")]
    pub total_timeout_seconds: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> Vec<u64> {
    vec![2, 5, 10]
}

fn default_inactivity_timeout() -> u64 {
    120
}

fn default_total_timeout() -> u64 {
    300
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_seconds: default_backoff(),
            inactivity_timeout_seconds: default_inactivity_timeout(),
            total_timeout_seconds: default_total_timeout(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("supervisor max_attempts must be at least 1".to_string());
        }
        if self.inactivity_timeout_seconds == 0 || self.total_timeout_seconds == 0 {
            return Err("supervisor timeouts must be non-zero".to_string());
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let last = self.backoff_seconds.len().saturating_sub(1);
        let index = (retry.saturating_sub(1) as usize).min(last);
        Duration::from_secs(self.backoff_seconds.get(index).copied().unwrap_or(0))
    }
}

/// Errors surfaced by the supervisor
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorError {
    /// The endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    /// No event arrived within the inactivity window
    #[error("No activity for {0}s, request timed out")]
    Inactivity(u64),

    /// The whole request outlived its ceiling
    #[error("Request timed out after {0}s")]
    Deadline(u64),

    /// The pipeline reported a failure
    #[error("{message}")]
    Pipeline {
        message: String,
        raw: Option<String>,
    },

    /// A final result without any files
    #[error("no files produced")]
    NoFiles,

    /// The stream ended without a terminal event
    #[error("Stream ended before a result arrived")]
    Incomplete,

    #[error("Request cancelled")]
    Cancelled,
}

impl SupervisorError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SupervisorError::Http { status, .. } => *status >= 500,
            SupervisorError::Network(_)
            | SupervisorError::Inactivity(_)
            | SupervisorError::NoFiles
            | SupervisorError::Incomplete => true,
            SupervisorError::Pipeline { message, raw } => {
                is_retryable_text(raw.as_deref().unwrap_or(message))
            }
            SupervisorError::Deadline(_) | SupervisorError::Cancelled => false,
        }
    }

    /// Message safe to show to a user
    pub fn user_message(&self) -> String {
        match self {
            SupervisorError::Pipeline { message, .. } => message.clone(),
            other => crate::utils::error::sanitize(&other.to_string()),
        }
    }
}

/// Whether raw failure text describes a retryable condition: a 5xx status,
/// a timeout, or a run that produced no files.
pub fn is_retryable_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    if ["timeout", "timed out", "no files produced"]
        .iter()
        .any(|marker| lower.contains(marker))
    {
        return true;
    }
    mentions_server_error(&lower)
}

fn mentions_server_error(lower: &str) -> bool {
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    tokens.windows(2).any(|pair| {
        matches!(pair[0], "http" | "status")
            && pair[1]
                .parse::<u16>()
                .is_ok_and(|code| (500..600).contains(&code))
    })
}

/// Where pipeline runs come from
#[async_trait]
pub trait PipelineSource: Send + Sync {
    /// Start one run
    async fn open(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, SupervisorError>;
}

/// Runs the pipeline in this process
pub struct LocalSource {
    runner: PipelineRunner,
}

impl LocalSource {
    pub fn new(runner: PipelineRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PipelineSource for LocalSource {
    async fn open(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, SupervisorError> {
        Ok(self.runner.spawn(request.clone(), cancel))
    }
}

/// Reads the SSE event stream of a remote `POST /api/gen-ai-code`
pub struct RemoteSource {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteSource {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SupervisorError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SupervisorError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

const REMOTE_CHANNEL_CAPACITY: usize = 64;
const MAX_ERROR_BODY_CHARS: usize = 300;

#[async_trait]
impl PipelineSource for RemoteSource {
    async fn open(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, SupervisorError> {
        let send = self
            .client
            .post(&self.endpoint)
            .header("Accept", "text/event-stream")
            .json(request)
            .send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(SupervisorError::Cancelled),
            response = send => response.map_err(|e| SupervisorError::Network(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SupervisorError::Http {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let (sink, stream) = EventStream::channel(REMOTE_CHANNEL_CAPACITY, cancel.clone());
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => return,
                    chunk = bytes.next() => chunk,
                };
                match chunk {
                    Some(Ok(chunk)) => {
                        for event in decoder.feed(&chunk) {
                            if !sink.emit(event).await {
                                return;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        debug!("Remote stream read failed: {}", err);
                        return;
                    }
                    None => break,
                }
            }
            if let Some(event) = decoder.finish() {
                sink.emit(event).await;
            }
        });
        Ok(stream)
    }
}

/// Bounded end-to-end retry around a pipeline source
pub struct RetrySupervisor<S: PipelineSource> {
    source: S,
    config: SupervisorConfig,
}

impl<S: PipelineSource> RetrySupervisor<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            config: SupervisorConfig::default(),
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub async fn run(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<ProjectArtifact, SupervisorError> {
        self.run_with(request, cancel, |_| {}).await
    }

    /// Like [`run`](Self::run), handing every received event to `on_event`.
    pub async fn run_with<F>(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<ProjectArtifact, SupervisorError>
    where
        F: FnMut(&StreamEvent) + Send,
    {
        let total = Duration::from_secs(self.config.total_timeout_seconds);
        let deadline = Instant::now() + total;
        let mut last_error = SupervisorError::Incomplete;

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                let backoff = self.config.backoff(attempt - 1);
                info!(attempt, "Retrying generation in {}s", backoff.as_secs());
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SupervisorError::Cancelled),
                    slept = timeout_at(deadline, tokio::time::sleep(backoff)) => {
                        if slept.is_err() {
                            return Err(SupervisorError::Deadline(total.as_secs()));
                        }
                    }
                }
            }

            match self.attempt(request, cancel, deadline, &mut on_event).await {
                Ok(artifact) => return Ok(artifact),
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(attempt, "Generation attempt failed, will retry: {}", err);
                    last_error = err;
                }
                Err(err) => {
                    warn!(attempt, "Generation attempt failed: {}", err);
                    return Err(err);
                }
            }
        }
        Err(last_error)
    }

    async fn attempt<F>(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        deadline: Instant,
        on_event: &mut F,
    ) -> Result<ProjectArtifact, SupervisorError>
    where
        F: FnMut(&StreamEvent) + Send,
    {
        let total_secs = self.config.total_timeout_seconds;
        let inactivity = Duration::from_secs(self.config.inactivity_timeout_seconds);
        let attempt_cancel = cancel.child_token();

        let open = self.source.open(request, attempt_cancel.clone());
        let mut stream = match timeout_at(deadline, open).await {
            Ok(stream) => stream?,
            Err(_) => {
                attempt_cancel.cancel();
                return Err(SupervisorError::Deadline(total_secs));
            }
        };

        loop {
            let window = (Instant::now() + inactivity).min(deadline);
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(SupervisorError::Cancelled),
                next = timeout_at(window, stream.next()) => next,
            };
            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => return Err(SupervisorError::Incomplete),
                Err(_) => {
                    stream.cancel();
                    if Instant::now() >= deadline {
                        return Err(SupervisorError::Deadline(total_secs));
                    }
                    return Err(SupervisorError::Inactivity(inactivity.as_secs()));
                }
            };

            on_event(&event);
            match event {
                StreamEvent::Final { artifact, .. } => {
                    if artifact.is_empty() {
                        return Err(SupervisorError::NoFiles);
                    }
                    return Ok(artifact);
                }
                StreamEvent::Error {
                    error, raw_error, ..
                } => {
                    return Err(SupervisorError::Pipeline {
                        message: error,
                        raw: raw_error,
                    });
                }
                _ => {}
            }
        }
    }
}
