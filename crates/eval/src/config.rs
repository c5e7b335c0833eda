use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::types::ModelId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Everything a run needs, threaded explicitly into the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default = "default_model")]
    pub model: ModelId,

    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub generation: GenerationSettings,

    /// Worker count when parallel execution is enabled.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Describe similar contracts with the model before using them as context.
    #[serde(default = "default_describe_similar")]
    pub describe_similar: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Falls back to `OPENAI_API_KEY` / `GEMINI_API_KEY` depending on the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_wait_secs")]
    pub initial_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> ModelId {
    ModelId::Gpt4oMini
}
fn default_concurrency() -> usize {
    4
}
fn default_describe_similar() -> bool {
    true
}
fn default_max_retries() -> u32 {
    5
}
fn default_initial_wait_secs() -> u64 {
    10
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    4000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_wait_secs: default_initial_wait_secs(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.initial_wait_secs))
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            provider: ProviderSettings::default(),
            retry: RetrySettings::default(),
            generation: GenerationSettings::default(),
            concurrency: default_concurrency(),
            describe_similar: default_describe_similar(),
        }
    }
}

impl EvalConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Picks the parser from the file extension; anything but `.json` is YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlays `XRAG_*` environment variables. Malformed values are errors, not
    /// silently ignored.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(model) = std::env::var("XRAG_MODEL") {
            self.model = model.parse::<ModelId>()?;
        }

        if let Ok(value) = std::env::var("XRAG_MAX_RETRIES") {
            self.retry.max_retries = value
                .trim()
                .parse()
                .with_context(|| format!("XRAG_MAX_RETRIES is not a number: {}", value))?;
        }

        if let Ok(value) = std::env::var("XRAG_INITIAL_WAIT_SECS") {
            self.retry.initial_wait_secs = value
                .trim()
                .parse()
                .with_context(|| format!("XRAG_INITIAL_WAIT_SECS is not a number: {}", value))?;
        }

        if let Ok(value) = std::env::var("XRAG_CONCURRENCY") {
            self.concurrency = value
                .trim()
                .parse()
                .with_context(|| format!("XRAG_CONCURRENCY is not a number: {}", value))?;
        }

        self.validate()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.generation.max_tokens == 0 || self.generation.max_tokens > u32::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "max_tokens {} outside [1, {}]",
                self.generation.max_tokens,
                u16::MAX
            )));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} outside [0, 2]",
                self.generation.temperature
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

pub const EXAMPLE_CONFIG: &str = r#"
# Evaluation run configuration

model: gpt-4o-mini          # gpt-4o | gpt-4o-mini | o3-mini | gemini-2.0-flash-lite | gemini-1.5-flash

provider: {}
  # api_key: sk-...         # Optional, defaults to OPENAI_API_KEY / GEMINI_API_KEY
  # base_url: https://...   # Optional, custom endpoint

retry:
  max_retries: 5
  initial_wait_secs: 10

generation:
  temperature: 0.0
  max_tokens: 4000

concurrency: 4
describe_similar: true
"#;
