//! TOML configuration with environment overrides.
//!
//! Every section is optional; missing keys fall back to the pipeline
//! defaults. After the file is parsed, `RAGLINE_*` environment variables
//! override the recognised tuning options. The OpenAI API key is never
//! read from the file, only from `OPENAI_API_KEY`.
//!
//! ```toml
//! [db]
//! path = "./data/ragline.sqlite"
//!
//! [chunking]
//! mode = "sentence"   # or "fixed"
//! size = 1000
//! overlap = 200
//!
//! [retrieval]
//! similarity_threshold = 0.7
//! top_k = 5
//! max_context_tokens = 2000
//!
//! [embedding]
//! provider = "openai"  # or "disabled"
//! model = "text-embedding-3-small"
//! dims = 1536
//! batch_size = 10
//!
//! [llm]
//! provider = "openai"
//! mini_model = "gpt-4o-mini"
//! premium_model = "gpt-4o"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragline_core::metering::PlanType;
use ragline_core::settings::{
    ChunkingMode, PipelineSettings, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
    DEFAULT_EMBEDDING_BATCH_SIZE, DEFAULT_EMBEDDING_MODEL, DEFAULT_MAX_CONTEXT_TOKENS,
    DEFAULT_MAX_DOCUMENT_CHARS, DEFAULT_SANITIZER_MAX_LENGTH, DEFAULT_SIMILARITY_THRESHOLD,
    DEFAULT_TOP_K,
};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sanitizer: SanitizerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub usage: UsageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/ragline.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub mode: ChunkingMode,
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            mode: ChunkingMode::default(),
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}
fn default_max_document_chars() -> usize {
    DEFAULT_MAX_DOCUMENT_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
        }
    }
}

fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}
fn default_top_k() -> usize {
    DEFAULT_TOP_K
}
fn default_max_context_tokens() -> usize {
    DEFAULT_MAX_CONTEXT_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct SanitizerConfig {
    #[serde(default = "default_sanitizer_max_length")]
    pub max_length: usize,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_SANITIZER_MAX_LENGTH,
        }
    }
}

fn default_sanitizer_max_length() -> usize {
    DEFAULT_SANITIZER_MAX_LENGTH
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_url: default_base_url(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    DEFAULT_EMBEDDING_BATCH_SIZE
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_mini_model")]
    pub mini_model: String,
    #[serde(default)]
    pub premium_model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            mini_model: default_mini_model(),
            premium_model: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
            base_url: default_base_url(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_mini_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    60
}

/// Identity used by the CLI when metering its own calls.
#[derive(Debug, Deserialize, Clone)]
pub struct UsageConfig {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub plan: PlanType,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            plan: PlanType::default(),
        }
    }
}

fn default_user_id() -> String {
    "local".to_string()
}

impl Config {
    /// Pipeline tuning handed to the core orchestrators.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            chunking_mode: self.chunking.mode,
            chunk_size: self.chunking.size,
            chunk_overlap: self.chunking.overlap,
            similarity_threshold: self.retrieval.similarity_threshold,
            top_k: self.retrieval.top_k,
            max_context_tokens: self.retrieval.max_context_tokens,
            embedding_batch_size: self.embedding.batch_size,
            sanitizer_max_length: self.sanitizer.max_length,
            max_document_chars: self.chunking.max_document_chars,
        }
    }
}

/// Read, override from the process environment, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    let mut config = Config::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Apply `RAGLINE_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        value
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", key, e))
    }

    if let Some(v) = lookup("RAGLINE_CHUNK_SIZE") {
        config.chunking.size = parse("RAGLINE_CHUNK_SIZE", v)?;
    }
    if let Some(v) = lookup("RAGLINE_CHUNK_OVERLAP") {
        config.chunking.overlap = parse("RAGLINE_CHUNK_OVERLAP", v)?;
    }
    if let Some(v) = lookup("RAGLINE_SIMILARITY_THRESHOLD") {
        config.retrieval.similarity_threshold = parse("RAGLINE_SIMILARITY_THRESHOLD", v)?;
    }
    if let Some(v) = lookup("RAGLINE_TOP_K") {
        config.retrieval.top_k = parse("RAGLINE_TOP_K", v)?;
    }
    if let Some(v) = lookup("RAGLINE_MAX_CONTEXT_TOKENS") {
        config.retrieval.max_context_tokens = parse("RAGLINE_MAX_CONTEXT_TOKENS", v)?;
    }
    if let Some(v) = lookup("RAGLINE_EMBEDDING_BATCH_SIZE") {
        config.embedding.batch_size = parse("RAGLINE_EMBEDDING_BATCH_SIZE", v)?;
    }
    if let Some(v) = lookup("RAGLINE_SANITIZER_MAX_LENGTH") {
        config.sanitizer.max_length = parse("RAGLINE_SANITIZER_MAX_LENGTH", v)?;
    }
    if let Some(v) = lookup("RAGLINE_EMBEDDING_MODEL") {
        let v = v.trim().to_string();
        if !v.is_empty() {
            config.embedding.model = v;
        }
    }
    Ok(())
}

/// `text-embedding-3-*` models can be shortened to any size up to their
/// native one; other known models only produce their native size.
fn check_openai_dims(model: &str, dims: usize) -> Result<()> {
    let Some(native) = crate::openai::native_dims(model) else {
        return Ok(());
    };
    let fits = if crate::openai::supports_dimensions(model) {
        dims <= native
    } else {
        dims == native
    };
    if !fits {
        anyhow::bail!(
            "embedding.dims = {} does not match model '{}' ({} dimensions)",
            dims,
            model,
            native
        );
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.size == 0 {
        anyhow::bail!("chunking.size must be > 0");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [-1.0, 1.0]");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }
    if config.sanitizer.max_length == 0 {
        anyhow::bail!("sanitizer.max_length must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    if config.embedding.provider == "openai" {
        check_openai_dims(&config.embedding.model, config.embedding.dims)?;
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    Ok(())
}
