//! Fallback Orchestrator
//!
//! Runs one logical completion across the (credential, model) combinations
//! of a roster, sequentially, until one succeeds. Each combo is attempted at
//! most once per call. Outcomes feed the shared [`HealthTracker`] so later
//! calls start from healthier combos.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::health::HealthTracker;
use crate::provider::{CompletionTransport, TextStream};
use crate::roster::ModelRoster;
use crate::types::{credential_label, Credential, LlmError, LlmRequestOptions, LlmResult, Message};

/// Reasons a combo attempt can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// A timer expired
    Timeout,
    /// Quota, credit or rate limit on the credential
    RateLimited,
    /// Upstream 5xx
    ServerError,
    /// Other non-2xx status
    HttpError,
    /// Network/connection error
    NetworkError,
    /// Model produced nothing
    EmptyResponse,
    /// Response could not be decoded
    InvalidResponse,
    /// Caller cancelled
    Cancelled,
    /// Anything else
    Error,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::RateLimited => write!(f, "rate_limited"),
            FailureReason::ServerError => write!(f, "server_error"),
            FailureReason::HttpError => write!(f, "http_error"),
            FailureReason::NetworkError => write!(f, "network_error"),
            FailureReason::EmptyResponse => write!(f, "empty_response"),
            FailureReason::InvalidResponse => write!(f, "invalid_response"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Error => write!(f, "error"),
        }
    }
}

impl FailureReason {
    /// Classify a provider error
    pub fn from_error(err: &LlmError) -> Self {
        if err.exhausts_credential() {
            return FailureReason::RateLimited;
        }
        match err {
            LlmError::Timeout { .. } => FailureReason::Timeout,
            LlmError::Http { status, .. } if *status >= 500 => FailureReason::ServerError,
            LlmError::Http { .. } => FailureReason::HttpError,
            LlmError::NetworkError { .. } => FailureReason::NetworkError,
            LlmError::EmptyResponse => FailureReason::EmptyResponse,
            LlmError::ParseError { .. } => FailureReason::InvalidResponse,
            LlmError::Cancelled => FailureReason::Cancelled,
            _ => FailureReason::Error,
        }
    }
}

/// Configuration for fallback behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FallbackConfig {
    /// Delay between attempts in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_between_attempts_ms: u64,
}

fn default_delay_ms() -> u64 {
    300
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            delay_between_attempts_ms: default_delay_ms(),
        }
    }
}

/// One (credential, model) pair to try
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combo {
    /// Index into the credential pool
    pub credential: usize,
    pub model: String,
}

impl std::fmt::Display for Combo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", credential_label(self.credential), self.model)
    }
}

/// Record of a single combo attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackAttempt {
    /// Combo label (`key#N -> model`)
    pub combo: String,
    pub success: bool,
    pub failure_reason: Option<FailureReason>,
    pub error_message: Option<String>,
    /// Whether the failure counted against the credential
    pub credential_penalized: bool,
    pub duration_ms: u64,
    pub started_at: String,
}

impl FallbackAttempt {
    /// Create a successful attempt record
    pub fn success(combo: &Combo, duration_ms: u64) -> Self {
        Self {
            combo: combo.to_string(),
            success: true,
            failure_reason: None,
            error_message: None,
            credential_penalized: false,
            duration_ms,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Create a failed attempt record
    pub fn failure(combo: &Combo, err: &LlmError, duration_ms: u64) -> Self {
        Self {
            combo: combo.to_string(),
            success: false,
            failure_reason: Some(FailureReason::from_error(err)),
            error_message: Some(err.to_string()),
            credential_penalized: err.exhausts_credential(),
            duration_ms,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Log of all attempts made for one call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackExecutionLog {
    pub attempts: Vec<FallbackAttempt>,
    pub total_duration_ms: u64,
    pub successful_combo: Option<String>,
    pub overall_success: bool,
}

impl FallbackExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_attempt(&mut self, attempt: FallbackAttempt) {
        self.total_duration_ms += attempt.duration_ms;
        if attempt.success {
            self.successful_combo = Some(attempt.combo.clone());
            self.overall_success = true;
        }
        self.attempts.push(attempt);
    }

    /// Get the number of failed attempts before success
    pub fn failed_attempts_count(&self) -> usize {
        self.attempts.iter().filter(|a| !a.success).count()
    }
}

/// Fallback orchestrator over a credential pool and a transport
pub struct FallbackOrchestrator {
    transport: Arc<dyn CompletionTransport>,
    credentials: Vec<Credential>,
    health: Arc<HealthTracker>,
    config: FallbackConfig,
}

impl FallbackOrchestrator {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        credentials: Vec<Credential>,
        health: Arc<HealthTracker>,
    ) -> Self {
        Self {
            transport,
            credentials,
            health,
            config: FallbackConfig::default(),
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: FallbackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    /// Combos for `roster` in attempt order.
    ///
    /// Healthy models in roster order, each paired with every usable
    /// credential. If that leaves nothing, every model with every credential,
    /// starting from the tracker's next usable credential.
    pub fn ordered_combos(&self, roster: &ModelRoster) -> Vec<Combo> {
        let count = self.credentials.len();
        let usable: Vec<usize> = (0..count)
            .filter(|&i| self.health.is_credential_usable(i))
            .collect();

        let mut combos: Vec<Combo> = Vec::new();
        for model in roster.models() {
            if !self.health.model_healthy(model) {
                continue;
            }
            for &credential in &usable {
                combos.push(Combo {
                    credential,
                    model: model.clone(),
                });
            }
        }

        if combos.is_empty() && count > 0 {
            let first = self.health.next_usable_credential().unwrap_or(0);
            for model in roster.models() {
                for offset in 0..count {
                    combos.push(Combo {
                        credential: (first + offset) % count,
                        model: model.clone(),
                    });
                }
            }
        }
        combos
    }

    /// Non-streaming completion with fallback.
    pub async fn complete(
        &self,
        messages: &[Message],
        roster: &ModelRoster,
        options: &LlmRequestOptions,
        cancel: &CancellationToken,
    ) -> LlmResult<String> {
        self.complete_with_log(messages, roster, options, cancel)
            .await
            .map(|(text, _)| text)
    }

    /// Like [`complete`](Self::complete), also returning the attempt log.
    pub async fn complete_with_log(
        &self,
        messages: &[Message],
        roster: &ModelRoster,
        options: &LlmRequestOptions,
        cancel: &CancellationToken,
    ) -> LlmResult<(String, FallbackExecutionLog)> {
        let transport = self.transport.clone();
        self.execute_with_fallback(roster, cancel, |credential, model| {
            let transport = transport.clone();
            async move {
                transport
                    .complete(credential.secret(), &model, messages, options)
                    .await
            }
        })
        .await
    }

    /// Streaming completion with fallback.
    ///
    /// An attempt succeeds once its first delta arrives; that delta is
    /// replayed at the head of the returned stream.
    pub async fn stream(
        &self,
        messages: &[Message],
        roster: &ModelRoster,
        options: &LlmRequestOptions,
        cancel: &CancellationToken,
    ) -> LlmResult<TextStream> {
        let transport = self.transport.clone();
        self.execute_with_fallback(roster, cancel, |credential, model| {
            let transport = transport.clone();
            async move {
                let mut stream = transport
                    .stream(credential.secret(), &model, messages, options)
                    .await?;
                match stream.next().await {
                    Some(Ok(first)) => Ok(stream.replay(first)),
                    Some(Err(err)) => Err(err),
                    None => Err(LlmError::EmptyResponse),
                }
            }
        })
        .await
        .map(|(stream, _)| stream)
    }

    /// Try every combo once, in order, until `attempt` succeeds.
    async fn execute_with_fallback<F, Fut, T>(
        &self,
        roster: &ModelRoster,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> LlmResult<(T, FallbackExecutionLog)>
    where
        F: FnMut(Credential, String) -> Fut,
        Fut: std::future::Future<Output = LlmResult<T>>,
    {
        if self.credentials.is_empty() {
            error!("No credentials configured");
            return Err(LlmError::NoCredentials);
        }
        let combos = self.ordered_combos(roster);
        if combos.is_empty() {
            return Err(LlmError::Other {
                message: format!("no models configured for the {} roster", roster.tier),
            });
        }

        let mut log = FallbackExecutionLog::new();
        let mut last_error: Option<LlmError> = None;
        let delay = Duration::from_millis(self.config.delay_between_attempts_ms);

        for (index, combo) in combos.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                debug!("Waiting {}ms before next attempt", delay.as_millis());
                tokio::select! {
                    _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            debug!(combo = %combo, tier = %roster.tier, "Trying combo");
            let started = Instant::now();
            let credential = self.credentials[combo.credential].clone();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
                result = attempt(credential, combo.model.clone()) => result,
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(value) => {
                    self.health.record_success(combo.credential);
                    self.health.record_model_success(&combo.model);
                    info!(combo = %combo, duration_ms, "Combo succeeded");
                    log.add_attempt(FallbackAttempt::success(combo, duration_ms));
                    return Ok((value, log));
                }
                Err(LlmError::Cancelled) => {
                    debug!(combo = %combo, "Attempt cancelled");
                    return Err(LlmError::Cancelled);
                }
                Err(err) => {
                    self.health.record_model_failure(&combo.model);
                    if err.exhausts_credential() {
                        self.health.record_failure(combo.credential);
                    }
                    warn!(
                        combo = %combo,
                        reason = %FailureReason::from_error(&err),
                        "Combo failed: {}",
                        err
                    );
                    log.add_attempt(FallbackAttempt::failure(combo, &err, duration_ms));
                    last_error = Some(err);
                }
            }
        }

        error!(
            tier = %roster.tier,
            "All {} combos failed",
            log.failed_attempts_count()
        );
        Err(match last_error {
            Some(err) if err.exhausts_credential() => LlmError::Busy,
            Some(err) => err,
            None => LlmError::Other {
                message: "All models failed".to_string(),
            },
        })
    }
}
