//! Application State
//!
//! Wires the provider layer and the services together from an [`AppConfig`].
//! One `AppState` per process; its health tracker is shared by every request.

use std::sync::Arc;

use codeforge_llm::{
    CompletionTransport, FallbackOrchestrator, HealthTracker, OpenRouterTransport,
};
use tracing::{info, warn};

use crate::models::settings::AppConfig;
use crate::services::assistant::Assistant;
use crate::services::phase::PhasedGenerator;
use crate::services::pipeline::PipelineRunner;
use crate::utils::error::AppResult;

/// Shared services handed to handlers and the CLI
#[derive(Clone)]
pub struct AppState {
    pub runner: PipelineRunner,
    pub assistant: Arc<Assistant>,
    pub health: Arc<HealthTracker>,
}

impl AppState {
    /// Build against the OpenRouter gateway
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let transport = OpenRouterTransport::new(config.transport_config())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build against any completion transport
    pub fn with_transport(config: &AppConfig, transport: Arc<dyn CompletionTransport>) -> Self {
        let credentials = config.credentials();
        if credentials.is_empty() {
            warn!("No API keys configured, every completion will fail");
        }
        let health = Arc::new(HealthTracker::with_policy(
            credentials.len(),
            config.health_policy(),
        ));
        let llm = Arc::new(
            FallbackOrchestrator::new(transport, credentials, health.clone())
                .with_config(config.fallback.clone()),
        );

        let generator =
            PhasedGenerator::new(llm.clone(), config.fast_roster(), config.code_roster())
                .with_config(config.generation.clone());
        let runner = PipelineRunner::new(Arc::new(generator)).with_config(config.pipeline.clone());
        let assistant = Assistant::new(llm, config.fast_roster())
            .with_config(config.assistant.clone());

        info!(
            credentials = health.credential_count(),
            fast_models = config.fast_models.len(),
            code_models = config.code_models.len(),
            "Application state ready"
        );
        Self {
            runner,
            assistant: Arc::new(assistant),
            health,
        }
    }
}
