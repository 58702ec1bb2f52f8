//! Codeforge
//!
//! AI website builder backend. A natural-language prompt goes in; a
//! multi-file React project comes out, streamed as progress events while it
//! is planned and generated file by file.
//!
//! - `models` - request, artifact, event and configuration types
//! - `services` - phased generator, pipeline runner, supervisor, HTTP surface
//! - `state` - service wiring from an `AppConfig`
//! - `utils` - error taxonomy and tracing setup

pub mod models;
pub mod services;
pub mod state;
pub mod utils;

// ── Models ─────────────────────────────────────────────────────────────
pub use models::artifact::{
    FileContent, FilePlanEntry, GeneratedFile, GenerationOptions, GenerationRequest,
    ProjectArtifact,
};
pub use models::events::{SseDecoder, StreamEvent};
pub use models::settings::AppConfig;

// ── Services ───────────────────────────────────────────────────────────
pub use services::phase::{GenerationPhase, PhasedGenerator};
pub use services::pipeline::{EventStream, PipelineRunner};
pub use services::supervisor::{LocalSource, RemoteSource, RetrySupervisor, SupervisorError};

// ── State & Errors ─────────────────────────────────────────────────────
pub use state::AppState;
pub use utils::error::{AppError, AppResult, ErrorCategory};
