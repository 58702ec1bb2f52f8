//! Codeforge LLM
//!
//! Provider layer for the Codeforge workspace:
//! - message, credential and error types
//! - the `CompletionTransport` trait and its OpenRouter implementation
//! - the OpenAI-compatible SSE adapter
//! - credential & model health tracking
//! - the fallback orchestrator and model rosters
//!
//! Also includes the HTTP client factory.

pub mod fallback;
pub mod health;
pub mod http_client;
pub mod openrouter;
pub mod provider;
pub mod roster;
pub mod streaming_adapters;
pub mod types;

// Re-export main types
pub use fallback::{
    Combo, FailureReason, FallbackAttempt, FallbackConfig, FallbackExecutionLog,
    FallbackOrchestrator,
};
pub use health::{HealthPolicy, HealthSnapshot, HealthTracker};
pub use http_client::build_http_client;
pub use openrouter::{OpenRouterTransport, TransportConfig, OPENROUTER_API_URL};
pub use provider::{parse_http_error, CompletionTransport, TextStream};
pub use roster::{ModelRoster, ModelTier, CODE_MODELS, FAST_MODELS};
pub use types::*;

// Re-export streaming adapters
pub use streaming_adapters::OpenAIAdapter;
