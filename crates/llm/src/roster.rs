//! Model Rosters
//!
//! Ordered lists of model identifiers tried by the fallback orchestrator.
//! The fast roster serves planning and chat; the code roster serves file
//! generation.

use serde::{Deserialize, Serialize};

pub const FAST_MODELS: &[&str] = &[
    "stepfun/step-3.5-flash:free",
    "deepseek/deepseek-r1-0528:free",
    "arcee-ai/trinity-large-preview:free",
];

pub const CODE_MODELS: &[&str] = &[
    "arcee-ai/trinity-large-preview:free",
    "stepfun/step-3.5-flash:free",
    "deepseek/deepseek-r1-0528:free",
];

/// Roster tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Code,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Fast => write!(f, "fast"),
            ModelTier::Code => write!(f, "code"),
        }
    }
}

/// An ordered list of models for one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRoster {
    pub tier: ModelTier,
    pub models: Vec<String>,
}

impl ModelRoster {
    pub fn new(tier: ModelTier, models: Vec<String>) -> Self {
        Self { tier, models }
    }

    /// The built-in fast roster
    pub fn fast() -> Self {
        Self::new(ModelTier::Fast, to_owned(FAST_MODELS))
    }

    /// The built-in code roster
    pub fn code() -> Self {
        Self::new(ModelTier::Code, to_owned(CODE_MODELS))
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Parse a comma-separated model list. Blank entries and repeats are dropped.
    pub fn parse_list(list: &str) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        for model in list.split(',').map(str::trim).filter(|m| !m.is_empty()) {
            if !models.iter().any(|m| m == model) {
                models.push(model.to_string());
            }
        }
        models
    }
}

fn to_owned(models: &[&str]) -> Vec<String> {
    models.iter().map(|m| m.to_string()).collect()
}
