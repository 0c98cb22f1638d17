//! TOML configuration.
//!
//! Every recognized option is enumerated here and validated once in
//! [`load_config`], so a bad value fails at startup rather than on the
//! first request. Relative paths resolve against the config file's
//! directory.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use health_rag_core::chunk;
use health_rag_core::prompt::PromptTemplate;
use health_rag_core::{RagError, Result};

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Directory of the config file; set by [`load_config`].
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Index build and retrieval parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Maximum chunk length, in chars.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chars shared by consecutive chunks; must be smaller than `chunk_size`.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Results requested from each sub-retriever; fused context holds at most `2 × top_k`.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Model passed to the embedding provider.
    pub embedding_model_id: String,
    /// Model passed to the generation provider.
    pub generation_model_id: String,
    /// System prompt template version (`"1.0"` Korean, `"1.0-en"` English).
    #[serde(default = "default_template_version")]
    pub prompt_template_version: String,
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_top_k() -> usize {
    4
}
fn default_template_version() -> String {
    "1.0".to_string()
}

/// Crawl output files, each a JSON array of documents.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CorpusConfig {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `openai`, `ollama`, `hashing`, or `local`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Base URL override (OpenAI-compatible gateway or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout(),
            retry_base_ms: default_retry_base_ms(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_retry_base_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `openai` or `ollama`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    /// Sampling temperature; `None` keeps the provider default.
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// Upper bound on one whole turn (retrieval + generation with retries).
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            temperature: None,
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout(),
            turn_timeout_secs: default_turn_timeout(),
            retry_base_ms: default_retry_base_ms(),
            url: None,
        }
    }
}

fn default_generation_provider() -> String {
    "openai".to_string()
}
fn default_generation_retries() -> u32 {
    3
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_turn_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    /// SQLite file holding archived conversations.
    #[serde(default = "default_sessions_db")]
    pub db_path: PathBuf,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            db_path: default_sessions_db(),
        }
    }
}

fn default_sessions_db() -> PathBuf {
    PathBuf::from("data/sessions.sqlite")
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_base_ms))
    }
}

impl GenerationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_base_ms))
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}

impl Config {
    /// Resolve a config-relative path.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn corpus_paths(&self) -> Vec<PathBuf> {
        self.corpus.paths.iter().map(|p| self.resolve_path(p)).collect()
    }

    pub fn sessions_db_path(&self) -> PathBuf {
        self.resolve_path(&self.sessions.db_path)
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RagError::Config(format!("failed to read config file {}: {}", path.display(), e)))?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    parse_config(&content, base_dir)
}

/// Parse and validate config text. Relative paths resolve against `base_dir`.
pub fn parse_config(content: &str, base_dir: PathBuf) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).map_err(|e| RagError::Config(format!("failed to parse config: {}", e)))?;
    config.base_dir = base_dir;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let index = &config.index;
    chunk::validate_params(index.chunk_size, index.overlap)?;

    if index.top_k == 0 {
        return Err(RagError::Config("index.top_k must be >= 1".into()));
    }
    if index.embedding_model_id.trim().is_empty() {
        return Err(RagError::Config("index.embedding_model_id must not be empty".into()));
    }
    if index.generation_model_id.trim().is_empty() {
        return Err(RagError::Config("index.generation_model_id must not be empty".into()));
    }
    PromptTemplate::for_version(&index.prompt_template_version)?;

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.dims.unwrap_or(0) == 0 {
                return Err(RagError::Config(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                )));
            }
        }
        "hashing" | "local" => {
            if config.embedding.dims == Some(0) {
                return Err(RagError::Config("embedding.dims must be > 0".into()));
            }
        }
        other => {
            return Err(RagError::Config(format!(
                "unknown embedding provider: '{}'. Must be openai, ollama, hashing, or local.",
                other
            )))
        }
    }
    if config.embedding.batch_size == 0 {
        return Err(RagError::Config("embedding.batch_size must be > 0".into()));
    }

    match config.generation.provider.as_str() {
        "openai" | "ollama" => {}
        other => {
            return Err(RagError::Config(format!(
                "unknown generation provider: '{}'. Must be openai or ollama.",
                other
            )))
        }
    }
    if let Some(t) = config.generation.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(RagError::Config("generation.temperature must be in [0.0, 2.0]".into()));
        }
    }
    if config.generation.turn_timeout_secs == 0 {
        return Err(RagError::Config("generation.turn_timeout_secs must be > 0".into()));
    }

    Ok(())
}
