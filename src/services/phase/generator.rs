//! Phased Generator
//!
//! Drives one generation run through its phases:
//!
//! 1. **Planning**: one non-streaming call on the fast roster for a file
//!    plan, retried a few times, falling back to the default plan.
//! 2. **Generating**: one non-streaming call per plan entry on the code
//!    roster, strictly sequential, with per-file retry and backoff. A file
//!    that exhausts its retries becomes a placeholder so the output always
//!    has one file per plan entry.
//! 3. **Fallback**: only when no real file came out of step 2. One streamed
//!    request for the whole project as a single JSON document.

use std::sync::Arc;
use std::time::Duration;

use codeforge_core::{
    extract_keyed_object, recover, strip_code_fences, strip_reasoning, CoreError, CoreResult,
};
use codeforge_llm::{FallbackOrchestrator, LlmError, LlmRequestOptions, ModelRoster};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::manager::{GenerationConfig, GenerationPhase, PhaseTracker};
use super::plan::{parse_plan, FilePlan};
use crate::models::artifact::{FilePlanEntry, GeneratedFile, GenerationRequest, ProjectArtifact};
use crate::models::events::StreamEvent;
use crate::services::pipeline::EventSink;
use crate::services::prompts;
use crate::utils::error::{sanitize, AppError, AppResult};

/// Phased project generator
pub struct PhasedGenerator {
    llm: Arc<FallbackOrchestrator>,
    fast: ModelRoster,
    code: ModelRoster,
    config: GenerationConfig,
}

impl PhasedGenerator {
    pub fn new(llm: Arc<FallbackOrchestrator>, fast: ModelRoster, code: ModelRoster) -> Self {
        Self {
            llm,
            fast,
            code,
            config: GenerationConfig::default(),
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<FallbackOrchestrator> {
        &self.llm
    }

    /// Run every phase, emitting progress to `sink`.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> AppResult<ProjectArtifact> {
        let mut phases = PhaseTracker::new();
        sink.emit(StreamEvent::phase(
            GenerationPhase::Planning,
            "Planning project structure...",
        ))
        .await;

        let plan = self.plan(request, cancel).await?;
        advance(&mut phases, GenerationPhase::Planned)?;
        info!(files = plan.len(), title = %plan.project_title, "Plan ready");
        sink.emit(StreamEvent::planned(
            format!("Planned {} files", plan.len()),
            plan.entries.clone(),
        ))
        .await;

        advance(&mut phases, GenerationPhase::Generating)?;
        let files = self.generate_files(request, &plan, sink, cancel).await?;
        let real = files.iter().filter(|f| !f.placeholder).count();

        if real > 0 {
            advance(&mut phases, GenerationPhase::Done)?;
            info!(
                files = files.len(),
                placeholders = files.len() - real,
                "Phased generation finished"
            );
            sink.emit(StreamEvent::phase(
                GenerationPhase::Done,
                format!("Generated {} of {} files", real, files.len()),
            ))
            .await;
            return Ok(ProjectArtifact::from_files(
                &plan.project_title,
                &plan.explanation,
                &files,
            ));
        }

        warn!("Phased generation produced no files, switching to single-request generation");
        advance(&mut phases, GenerationPhase::Fallback)?;
        sink.emit(StreamEvent::phase(
            GenerationPhase::Fallback,
            "Retrying with single-request generation...",
        ))
        .await;

        match self.legacy(request, sink, cancel).await {
            Ok(artifact) => {
                advance(&mut phases, GenerationPhase::Done)?;
                sink.emit(StreamEvent::phase(
                    GenerationPhase::Done,
                    format!("Generated {} files", artifact.files.len()),
                ))
                .await;
                Ok(artifact)
            }
            Err(err) => {
                advance(&mut phases, GenerationPhase::Failed)?;
                Err(err)
            }
        }
    }

    /// Ask for a file plan. Only cancellation and missing credentials fail.
    pub async fn plan(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> AppResult<FilePlan> {
        let config = &self.config.planning;
        let messages = prompts::plan_messages(request);
        let options = LlmRequestOptions::default()
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature)
            .with_timeout(Duration::from_secs(config.timeout_seconds));

        for attempt in 1..=config.max_attempts {
            if attempt > 1 {
                pause(Duration::from_millis(config.retry_delay_ms), cancel).await?;
            }
            match self.llm.complete(&messages, &self.fast, &options, cancel).await {
                Ok(text) => match parse_plan(&text) {
                    Some(plan) => return Ok(plan),
                    None => warn!(
                        attempt,
                        chars = text.len(),
                        "Planner answer held no usable plan"
                    ),
                },
                Err(err) => {
                    if let Some(fatal) = fatal(&err) {
                        return Err(fatal);
                    }
                    warn!(attempt, "Planning attempt failed: {}", err);
                }
            }
        }

        warn!("Planning failed, using the default plan");
        Ok(FilePlan::default_plan())
    }

    async fn generate_files(
        &self,
        request: &GenerationRequest,
        plan: &FilePlan,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<GeneratedFile>> {
        let total = plan.len();
        let delay = Duration::from_millis(self.config.files.inter_file_delay_ms);
        let mut files = Vec::with_capacity(total);

        for (index, entry) in plan.entries.iter().enumerate() {
            if index > 0 {
                pause(delay, cancel).await?;
            }
            sink.emit(StreamEvent::generating(&entry.path, index + 1, total))
                .await;
            let file = self
                .generate_file(request, entry, &plan.entries, cancel)
                .await?;
            files.push(file);
        }
        Ok(files)
    }

    /// Generate one plan entry, substituting a placeholder when retries run out.
    pub async fn generate_file(
        &self,
        request: &GenerationRequest,
        entry: &FilePlanEntry,
        plan: &[FilePlanEntry],
        cancel: &CancellationToken,
    ) -> AppResult<GeneratedFile> {
        let config = &self.config.files;
        let messages = prompts::file_messages(request, entry, plan);
        let options = LlmRequestOptions::default()
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature)
            .with_timeout(Duration::from_secs(config.timeout_seconds));

        let mut last_reason = String::from("no attempts were made");
        for attempt in 1..=config.max_attempts {
            if attempt > 1 {
                let backoff = config.backoff(attempt - 1);
                debug!(path = %entry.path, "Retrying in {}ms", backoff.as_millis());
                pause(backoff, cancel).await?;
            }
            match self.llm.complete(&messages, &self.code, &options, cancel).await {
                Ok(text) => {
                    let code = clean_code(&text);
                    let chars = code.chars().count();
                    if chars > config.min_code_chars {
                        debug!(path = %entry.path, chars, "File generated");
                        return Ok(GeneratedFile::new(&entry.path, code));
                    }
                    warn!(path = %entry.path, attempt, chars, "File response too short");
                    last_reason = format!("response too short ({} chars)", chars);
                }
                Err(err) => {
                    if let Some(fatal) = fatal(&err) {
                        return Err(fatal);
                    }
                    warn!(path = %entry.path, attempt, "File attempt failed: {}", err);
                    last_reason = err.to_string();
                }
            }
        }

        error!(path = %entry.path, "File generation exhausted retries: {}", last_reason);
        Ok(GeneratedFile::placeholder(&entry.path, &sanitize(&last_reason)))
    }

    /// Single-request generation of the whole project.
    async fn legacy(
        &self,
        request: &GenerationRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> AppResult<ProjectArtifact> {
        let config = &self.config.legacy;
        let messages = prompts::legacy_messages(request);
        let options = LlmRequestOptions::default().with_max_tokens(config.max_tokens);

        let mut last_error = String::from("empty response");
        for attempt in 1..=config.max_attempts {
            let first = attempt == 1;
            if !first {
                pause(Duration::from_millis(config.retry_delay_ms), cancel).await?;
                sink.emit(StreamEvent::phase(
                    GenerationPhase::Fallback,
                    format!("Retrying code generation ({}/{})...", attempt, config.max_attempts),
                ))
                .await;
            }

            let mut stream = match self.llm.stream(&messages, &self.code, &options, cancel).await {
                Ok(stream) => stream,
                Err(err) => {
                    if let Some(fatal) = fatal(&err) {
                        return Err(fatal);
                    }
                    warn!(attempt, "Single-request attempt failed: {}", err);
                    last_error = err.to_string();
                    continue;
                }
            };

            let mut text = String::new();
            let mut stream_error: Option<LlmError> = None;
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(delta)) => {
                        text.push_str(&delta);
                        // Retries stay silent so the caller never sees mixed partial output.
                        if first {
                            sink.emit(StreamEvent::chunk(delta)).await;
                        }
                    }
                    Some(Err(err)) => {
                        stream_error = Some(err);
                        break;
                    }
                    None => break,
                }
            }

            let parse_error = match parse_project(&text) {
                Ok(artifact) => {
                    info!(attempt, files = artifact.files.len(), "Single-request generation parsed");
                    return Ok(artifact);
                }
                Err(err) => err,
            };
            last_error = match stream_error {
                Some(err) => err.to_string(),
                None => parse_error.to_string(),
            };
            warn!(attempt, "Single-request attempt unusable: {}", last_error);
        }

        error!("Single-request generation failed: {}", last_error);
        Err(AppError::generation(format!("no files produced: {}", last_error)))
    }
}

/// Parse a whole-project answer: the recovery cascade first, then the
/// `"files"` subtree on its own.
pub fn parse_project(text: &str) -> CoreResult<ProjectArtifact> {
    let recovered = recover(text).into_result();
    if let Some(artifact) = recovered
        .as_ref()
        .ok()
        .and_then(ProjectArtifact::from_value)
    {
        return Ok(artifact);
    }
    if let Some(artifact) = extract_keyed_object(text, "files")
        .and_then(|files| ProjectArtifact::from_value(&serde_json::json!({ "files": files })))
    {
        return Ok(artifact);
    }
    match recovered {
        Ok(_) => Err(CoreError::missing_key("files")),
        Err(err) => Err(err),
    }
}

/// Strip reasoning and markdown fences from a single-file answer
pub fn clean_code(text: &str) -> String {
    strip_code_fences(&strip_reasoning(text))
}

fn fatal(err: &LlmError) -> Option<AppError> {
    match err {
        LlmError::Cancelled => Some(AppError::Cancelled),
        LlmError::NoCredentials => Some(AppError::Llm(LlmError::NoCredentials)),
        _ => None,
    }
}

fn advance(phases: &mut PhaseTracker, next: GenerationPhase) -> AppResult<()> {
    phases
        .advance(next)
        .map_err(|e| AppError::internal(e.to_string()))
}

async fn pause(duration: Duration, cancel: &CancellationToken) -> AppResult<()> {
    if duration.is_zero() {
        return if cancel.is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
