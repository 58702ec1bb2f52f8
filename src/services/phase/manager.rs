//! Generation Phases
//!
//! The phase state machine of one generation run and the per-phase
//! tunables.
//!
//! ```text
//! planning -> planned -> generating -> done
//!                             |
//!                             v
//!                          fallback -> done | failed
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phases of one generation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationPhase {
    /// Asking a fast model for the file plan
    #[default]
    Planning,
    /// Plan accepted (or defaulted)
    Planned,
    /// Generating plan entries one at a time
    Generating,
    /// Monolithic single-request generation
    Fallback,
    Done,
    Failed,
}

impl std::fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationPhase::Planning => write!(f, "planning"),
            GenerationPhase::Planned => write!(f, "planned"),
            GenerationPhase::Generating => write!(f, "generating"),
            GenerationPhase::Fallback => write!(f, "fallback"),
            GenerationPhase::Done => write!(f, "done"),
            GenerationPhase::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for GenerationPhase {
    type Err = PhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "planning" => Ok(GenerationPhase::Planning),
            "planned" => Ok(GenerationPhase::Planned),
            "generating" => Ok(GenerationPhase::Generating),
            "fallback" => Ok(GenerationPhase::Fallback),
            "done" => Ok(GenerationPhase::Done),
            "failed" => Ok(GenerationPhase::Failed),
            _ => Err(PhaseError::UnknownPhase(s.to_string())),
        }
    }
}

impl GenerationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationPhase::Done | GenerationPhase::Failed)
    }

    /// Whether the machine may move from `self` to `next`
    pub fn can_transition_to(&self, next: GenerationPhase) -> bool {
        use GenerationPhase::*;
        matches!(
            (self, next),
            (Planning, Planned)
                | (Planned, Generating)
                | (Generating, Generating)
                | (Generating, Done)
                | (Generating, Fallback)
                | (Fallback, Done)
                | (Fallback, Failed)
        )
    }
}

/// Errors that can occur in phase management
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhaseError {
    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition {
        from: GenerationPhase,
        to: GenerationPhase,
    },

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),
}

/// Tracks the current phase of one run and rejects illegal moves
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: GenerationPhase,
    history: Vec<GenerationPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: GenerationPhase::Planning,
            history: vec![GenerationPhase::Planning],
        }
    }

    pub fn current(&self) -> GenerationPhase {
        self.current
    }

    /// Every phase entered so far, in order
    pub fn history(&self) -> &[GenerationPhase] {
        &self.history
    }

    pub fn advance(&mut self, next: GenerationPhase) -> Result<(), PhaseError> {
        if !self.current.can_transition_to(next) {
            return Err(PhaseError::InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        self.current = next;
        self.history.push(next);
        Ok(())
    }
}

/// Planning phase settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanningConfig {
    #[serde(default = "default_plan_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_plan_temperature")]
    pub temperature: f32,
    /// Absolute ceiling per completion attempt, in seconds
    #[serde(default = "default_plan_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between planning attempts, in milliseconds
    #[serde(default = "default_plan_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_plan_max_tokens() -> u32 {
    2048
}

fn default_plan_temperature() -> f32 {
    0.3
}

fn default_plan_timeout() -> u64 {
    45
}

fn default_max_attempts() -> u32 {
    3
}

fn default_plan_retry_delay() -> u64 {
    2000
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_plan_max_tokens(),
            temperature: default_plan_temperature(),
            timeout_seconds: default_plan_timeout(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_plan_retry_delay(),
        }
    }
}

/// Per-file generation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileGenerationConfig {
    #[serde(default = "default_file_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_file_temperature")]
    pub temperature: f32,
    #[serde(default = "default_file_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay; doubles per retry
    #[serde(default = "default_file_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_file_backoff_max")]
    pub backoff_max_ms: u64,
    /// Cleaned output must be longer than this to count
    #[serde(default = "default_min_code_chars")]
    pub min_code_chars: usize,
    /// Pause between consecutive files
    #[serde(default = "default_inter_file_delay")]
    pub inter_file_delay_ms: u64,
}

fn default_file_max_tokens() -> u32 {
    4096
}

fn default_file_temperature() -> f32 {
    0.2
}

fn default_file_timeout() -> u64 {
    60
}

fn default_file_backoff_base() -> u64 {
    1000
}

fn default_file_backoff_max() -> u64 {
    8000
}

fn default_min_code_chars() -> usize {
    20
}

fn default_inter_file_delay() -> u64 {
    500
}

impl Default for FileGenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_file_max_tokens(),
            temperature: default_file_temperature(),
            timeout_seconds: default_file_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_file_backoff_base(),
            backoff_max_ms: default_file_backoff_max(),
            min_code_chars: default_min_code_chars(),
            inter_file_delay_ms: default_inter_file_delay(),
        }
    }
}

impl FileGenerationConfig {
    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Legacy monolithic generation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacyConfig {
    #[serde(default = "default_legacy_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_legacy_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_legacy_max_tokens() -> u32 {
    16384
}

fn default_legacy_retry_delay() -> u64 {
    3000
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_legacy_max_tokens(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_legacy_retry_delay(),
        }
    }
}

/// All phase settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    #[serde(default)]
    pub planning: PlanningConfig,
    #[serde(default)]
    pub files: FileGenerationConfig,
    #[serde(default)]
    pub legacy: LegacyConfig,
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.planning.max_attempts == 0
            || self.files.max_attempts == 0
            || self.legacy.max_attempts == 0
        {
            return Err("generation max_attempts must be at least 1".to_string());
        }
        if self.planning.timeout_seconds == 0 || self.files.timeout_seconds == 0 {
            return Err("generation timeouts must be non-zero".to_string());
        }
        Ok(())
    }
}
