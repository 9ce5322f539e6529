//! TOML configuration parsing and validation.
//!
//! The file is split into `[pipeline]`, `[embedding]`, `[index]`,
//! `[validation]`, and `[server]` sections, all of which have defaults.
//! Secrets (API keys) are read from the environment, never from the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: f64,
    #[serde(default = "default_validity_threshold")]
    pub validity_threshold: f64,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns_per_session: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub retrieval_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            chunk_threshold: default_chunk_threshold(),
            validity_threshold: default_validity_threshold(),
            session_ttl_secs: default_session_ttl_secs(),
            max_turns_per_session: default_max_turns(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retrieval_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_chunk_threshold() -> f64 {
    0.7
}
fn default_validity_threshold() -> f64 {
    0.75
}
fn default_session_ttl_secs() -> u64 {
    30 * 60
}
fn default_max_turns() -> usize {
    20
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_timeout_secs() -> u64 {
    30
}

/// Per-invocation pipeline parameters.
///
/// Built from [`PipelineSettings`] and passed into every pipeline call;
/// per-request overrides are applied to a copy and re-checked.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub top_k: usize,
    /// Minimum score for a chunk to count at all.
    pub chunk_threshold: f64,
    /// Minimum aggregated confidence for a query to be answerable.
    pub validity_threshold: f64,
    pub session_ttl: Duration,
    pub max_turns_per_session: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineSettings::default().to_pipeline_config()
    }
}

impl PipelineSettings {
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            top_k: self.top_k,
            chunk_threshold: self.chunk_threshold,
            validity_threshold: self.validity_threshold,
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            max_turns_per_session: self.max_turns_per_session,
        }
    }
}

impl PipelineConfig {
    /// Copy with per-call overrides applied, checked against the same
    /// bounds as the file-level settings.
    pub fn with_overrides(
        &self,
        top_k: Option<usize>,
        chunk_threshold: Option<f64>,
    ) -> Result<Self, PipelineError> {
        let mut cfg = self.clone();
        if let Some(k) = top_k {
            cfg.top_k = k;
        }
        if let Some(t) = chunk_threshold {
            cfg.chunk_threshold = t;
        }
        cfg.check()?;
        Ok(cfg)
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        if self.top_k < 1 {
            return Err(PipelineError::InvalidArgument("top_k must be >= 1".into()));
        }
        check_unit("chunk_threshold", self.chunk_threshold)?;
        check_unit("validity_threshold", self.validity_threshold)?;
        if self.validity_threshold <= 0.0 {
            return Err(PipelineError::InvalidArgument(
                "validity_threshold must be > 0".into(),
            ));
        }
        if self.max_turns_per_session < 1 {
            return Err(PipelineError::InvalidArgument(
                "max_turns_per_session must be >= 1".into(),
            ));
        }
        if self.session_ttl.is_zero() {
            return Err(PipelineError::InvalidArgument(
                "session_ttl must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Reject NaN, infinities, and values outside `[0, 1]`.
pub fn check_unit(name: &str, value: f64) -> Result<(), PipelineError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(PipelineError::InvalidArgument(format!(
            "{} must be in [0.0, 1.0], got {}",
            name, value
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Cohere input type for query embeddings.
    #[serde(default = "default_input_type")]
    pub input_type: String,
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
            input_type: default_input_type(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_input_type() -> String {
    "search_query".to_string()
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            collection: default_collection(),
        }
    }
}

fn default_backend() -> String {
    "qdrant".to_string()
}
fn default_collection() -> String {
    "textbook_chunks".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// JSON file with harness cases; the built-in fixtures are used when unset.
    #[serde(default)]
    pub cases: Option<PathBuf>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            cases: None,
        }
    }
}

fn default_tolerance() -> f64 {
    0.05
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
    "127.0.0.1:8000".to_string()
}

impl Config {
    pub fn pipeline(&self) -> PipelineConfig {
        self.pipeline.to_pipeline_config()
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.retrieval_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pipeline.sweep_interval_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate pipeline
    config.pipeline().check()?;
    if config.pipeline.retrieval_timeout_secs == 0 {
        anyhow::bail!("pipeline.retrieval_timeout_secs must be > 0");
    }
    if config.pipeline.sweep_interval_secs == 0 {
        anyhow::bail!("pipeline.sweep_interval_secs must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "cohere" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, cohere, or openai.",
            other
        ),
    }
    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified when provider is 'openai'");
    }

    // Validate index
    match config.index.backend.as_str() {
        "qdrant" => {
            if config.index.url.is_none() {
                anyhow::bail!("index.url must be specified when backend is 'qdrant'");
            }
        }
        "memory" => {}
        other => anyhow::bail!(
            "Unknown index backend: '{}'. Must be qdrant or memory.",
            other
        ),
    }

    // Validate harness
    if !config.validation.tolerance.is_finite() || config.validation.tolerance < 0.0 {
        anyhow::bail!("validation.tolerance must be >= 0");
    }

    Ok(config)
}
