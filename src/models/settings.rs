//! Settings Models
//!
//! Application configuration: an optional TOML file, then environment
//! overrides, then validation.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use codeforge_core::ProxyConfig;
use codeforge_llm::{
    Credential, FallbackConfig, HealthPolicy, ModelRoster, ModelTier, TransportConfig,
    CODE_MODELS, FAST_MODELS, OPENROUTER_API_URL,
};
use serde::{Deserialize, Serialize};

use crate::services::assistant::AssistantConfig;
use crate::services::phase::GenerationConfig;
use crate::services::pipeline::PipelineConfig;
use crate::services::supervisor::SupervisorConfig;
use crate::utils::error::{AppError, AppResult};

/// Highest numbered `OPENROUTER_API_KEY_N` variable read
pub const MAX_ENV_KEYS: usize = 10;

/// Transport timeouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportSettings {
    /// Absolute ceiling for a streamed attempt
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_seconds: u64,
    /// Ceiling from request send to first body byte
    #[serde(default = "default_first_byte_timeout")]
    pub first_byte_timeout_seconds: u64,
    /// Ceiling for a non-streamed attempt without a per-call value
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_seconds: u64,
}

fn default_stream_timeout() -> u64 {
    90
}

fn default_first_byte_timeout() -> u64 {
    25
}

fn default_completion_timeout() -> u64 {
    60
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            stream_timeout_seconds: default_stream_timeout(),
            first_byte_timeout_seconds: default_first_byte_timeout(),
            completion_timeout_seconds: default_completion_timeout(),
        }
    }
}

/// Credential and model health thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthSettings {
    #[serde(default = "default_exhaust_threshold")]
    pub exhaust_threshold: u32,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_model_failure_threshold")]
    pub model_failure_threshold: u32,
    #[serde(default = "default_cooldown")]
    pub model_failure_window_seconds: u64,
}

fn default_exhaust_threshold() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    120
}

fn default_model_failure_threshold() -> u32 {
    2
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            exhaust_threshold: default_exhaust_threshold(),
            cooldown_seconds: default_cooldown(),
            model_failure_threshold: default_model_failure_threshold(),
            model_failure_window_seconds: default_cooldown(),
        }
    }
}

/// HTTP surface settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Gateway API keys, tried in order. Never serialized.
    #[serde(default, skip_serializing)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as `HTTP-Referer`
    #[serde(default = "default_site_url")]
    pub site_url: String,
    /// Sent as `X-Title`
    #[serde(default = "default_site_name")]
    pub site_name: String,
    #[serde(default = "default_fast_models")]
    pub fast_models: Vec<String>,
    #[serde(default = "default_code_models")]
    pub code_models: Vec<String>,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_base_url() -> String {
    OPENROUTER_API_URL.to_string()
}

fn default_site_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_site_name() -> String {
    "Codeforge".to_string()
}

fn default_fast_models() -> Vec<String> {
    FAST_MODELS.iter().map(|m| m.to_string()).collect()
}

fn default_code_models() -> Vec<String> {
    CODE_MODELS.iter().map(|m| m.to_string()).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            base_url: default_base_url(),
            site_url: default_site_url(),
            site_name: default_site_name(),
            fast_models: default_fast_models(),
            code_models: default_code_models(),
            proxy: None,
            transport: TransportSettings::default(),
            health: HealthSettings::default(),
            fallback: FallbackConfig::default(),
            generation: GenerationConfig::default(),
            pipeline: PipelineConfig::default(),
            supervisor: SupervisorConfig::default(),
            assistant: AssistantConfig::default(),
            server: ServerSettings::default(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> AppResult<Self> {
        toml::from_str(text).map_err(|e| AppError::config(e.to_string()))
    }

    /// Load the optional TOML file, apply process environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate().map_err(AppError::config)?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Keys from `OPENROUTER_API_KEY` and `OPENROUTER_API_KEY_2..=10`
    /// replace any keys from the file when at least one is set.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut keys: Vec<String> = Vec::new();
        let names = std::iter::once("OPENROUTER_API_KEY".to_string())
            .chain((2..=MAX_ENV_KEYS).map(|i| format!("OPENROUTER_API_KEY_{}", i)));
        for name in names {
            if let Some(key) = read(&name) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        if !keys.is_empty() {
            self.api_keys = keys;
        }

        if let Some(url) = read("OPENROUTER_BASE_URL") {
            self.base_url = url;
        }
        if let Some(url) = read("NEXT_PUBLIC_APP_URL") {
            self.site_url = url;
        }
        if let Some(list) = read("CODEFORGE_FAST_MODELS") {
            self.fast_models = ModelRoster::parse_list(&list);
        }
        if let Some(list) = read("CODEFORGE_CODE_MODELS") {
            self.code_models = ModelRoster::parse_list(&list);
        }
        if let Some(bind) = read("CODEFORGE_BIND") {
            self.server.bind = bind;
        }
        if let Some(url) = read("CODEFORGE_PROXY") {
            self.proxy = Some(ProxyConfig::new(url));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("base_url must not be empty".to_string());
        }
        if self.fast_models.is_empty() {
            return Err("fast_models must list at least one model".to_string());
        }
        if self.code_models.is_empty() {
            return Err("code_models must list at least one model".to_string());
        }

        let t = &self.transport;
        if t.stream_timeout_seconds == 0
            || t.first_byte_timeout_seconds == 0
            || t.completion_timeout_seconds == 0
        {
            return Err("transport timeouts must be non-zero".to_string());
        }
        if t.first_byte_timeout_seconds > t.stream_timeout_seconds {
            return Err(format!(
                "first_byte_timeout_seconds ({}) cannot exceed stream_timeout_seconds ({})",
                t.first_byte_timeout_seconds, t.stream_timeout_seconds
            ));
        }

        if self.health.exhaust_threshold == 0 || self.health.model_failure_threshold == 0 {
            return Err("health thresholds must be at least 1".to_string());
        }

        if let Some(proxy) = &self.proxy {
            proxy.validate()?;
        }

        self.generation.validate()?;
        self.pipeline.validate()?;
        self.supervisor.validate()?;
        self.assistant.validate()?;

        self.server
            .bind
            .parse::<SocketAddr>()
            .map_err(|e| format!("Invalid bind address {}: {}", self.server.bind, e))?;

        Ok(())
    }

    pub fn credentials(&self) -> Vec<Credential> {
        self.api_keys.iter().map(Credential::new).collect()
    }

    pub fn fast_roster(&self) -> ModelRoster {
        ModelRoster::new(ModelTier::Fast, self.fast_models.clone())
    }

    pub fn code_roster(&self) -> ModelRoster {
        ModelRoster::new(ModelTier::Code, self.code_models.clone())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            base_url: self.base_url.clone(),
            site_url: self.site_url.clone(),
            site_name: self.site_name.clone(),
            stream_timeout: Duration::from_secs(self.transport.stream_timeout_seconds),
            first_byte_timeout: Duration::from_secs(self.transport.first_byte_timeout_seconds),
            completion_timeout: Duration::from_secs(self.transport.completion_timeout_seconds),
            proxy: self.proxy.clone(),
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            exhaust_threshold: self.health.exhaust_threshold,
            cooldown: Duration::from_secs(self.health.cooldown_seconds),
            model_failure_threshold: self.health.model_failure_threshold,
            model_failure_window: Duration::from_secs(self.health.model_failure_window_seconds),
        }
    }
}
