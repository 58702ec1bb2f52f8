//! Phased Generation
//!
//! Phase state machine, file plan parsing and the generator that drives a
//! run through planning, per-file generation and the single-request
//! fallback.

mod generator;
mod manager;
mod plan;

pub use generator::{clean_code, parse_project, PhasedGenerator};
pub use manager::{
    FileGenerationConfig, GenerationConfig, GenerationPhase, LegacyConfig, PhaseError,
    PhaseTracker, PlanningConfig,
};
pub use plan::{parse_plan, FilePlan};
