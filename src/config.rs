//! TOML configuration for the `a11y` binary and server.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use a11y_harness_core::chat::ChatSettings;
use a11y_harness_core::retrieve::RetrievalStrategy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Deadline for one page run, fetch excluded.
    #[serde(default = "default_pipeline_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_alt_text_concurrency")]
    pub alt_text_concurrency: usize,
    #[serde(default = "default_max_concurrent_pages")]
    pub max_concurrent_pages: usize,
    #[serde(default)]
    pub summarize: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_pipeline_timeout_secs(),
            user_agent: default_user_agent(),
            alt_text_concurrency: default_alt_text_concurrency(),
            max_concurrent_pages: default_max_concurrent_pages(),
            summarize: false,
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_pipeline_timeout_secs() -> u64 {
    120
}
fn default_user_agent() -> String {
    format!("a11y-harness/{}", env!("CARGO_PKG_VERSION"))
}
fn default_alt_text_concurrency() -> usize {
    4
}
fn default_max_concurrent_pages() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_chars: default_max_chars(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_chars() -> usize {
    a11y_harness_core::index::DEFAULT_MAX_CHARS
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    400
}
fn default_top_k() -> usize {
    8
}
fn default_max_context_chars() -> usize {
    8000
}

impl ChatConfig {
    pub fn settings(&self) -> ChatSettings {
        ChatSettings {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_k: self.top_k,
            max_context_chars: self.max_context_chars,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub strategy: RetrievalStrategy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate pipeline
    if config.pipeline.timeout_secs == 0 || config.pipeline.fetch_timeout_secs == 0 {
        anyhow::bail!("pipeline timeouts must be > 0");
    }
    if config.pipeline.alt_text_concurrency == 0 {
        anyhow::bail!("pipeline.alt_text_concurrency must be >= 1");
    }
    if config.pipeline.max_concurrent_pages == 0 {
        anyhow::bail!("pipeline.max_concurrent_pages must be >= 1");
    }

    // Validate chat
    if config.chat.top_k == 0 {
        anyhow::bail!("chat.top_k must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.chat.temperature) {
        anyhow::bail!("chat.temperature must be in [0.0, 2.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.max_chars == 0 {
        anyhow::bail!("embedding.max_chars must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse("[db]\npath = \"./data/a11y.sqlite\"\n").unwrap();
        assert_eq!(config.pipeline.timeout_secs, 120);
        assert_eq!(config.pipeline.alt_text_concurrency, 4);
        assert!(!config.pipeline.summarize);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.embedding.max_chars, 2000);
        assert_eq!(config.chat.top_k, 8);
        assert_eq!(config.chat.model, "gpt-4o-mini");
        assert_eq!(config.retrieval.strategy, RetrievalStrategy::Distance);
        assert_eq!(config.server.bind, "127.0.0.1:7331");
    }

    #[test]
    fn test_retrieval_strategy_parsed() {
        let config = parse("[db]\npath = \"x.db\"\n[retrieval]\nstrategy = \"recent\"\n").unwrap();
        assert_eq!(config.retrieval.strategy, RetrievalStrategy::Recent);
        assert!(parse("[db]\npath = \"x.db\"\n[retrieval]\nstrategy = \"hybrid\"\n").is_err());
    }

    #[test]
    fn test_enabled_provider_requires_model_and_dims() {
        let err = parse("[db]\npath = \"x.db\"\n[embedding]\nprovider = \"openai\"\n")
            .unwrap_err()
            .to_string();
        assert!(err.contains("embedding.dims"));

        let config = parse(
            "[db]\npath = \"x.db\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n",
        )
        .unwrap();
        assert!(config.embedding.is_enabled());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse(
            "[db]\npath = \"x.db\"\n[embedding]\nprovider = \"local\"\nmodel = \"m\"\ndims = 4\n",
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("Unknown embedding provider"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(parse("[db]\npath = \"x.db\"\n[pipeline]\nalt_text_concurrency = 0\n").is_err());
    }
}
