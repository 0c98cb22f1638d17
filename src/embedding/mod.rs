//! Embedding providers.
//!
//! Concrete [`Embedder`] implementations behind one factory:
//!
//! | `embedding.provider` | Type | Network |
//! |----------------------|------|---------|
//! | `"openai"` | [`OpenAIEmbedder`] | `POST {url}/embeddings` |
//! | `"ollama"` | [`OllamaEmbedder`] | `POST {url}/api/embed` |
//! | `"hashing"` | [`HashingEmbedder`] | none |
//! | `"local"` | `LocalEmbedder` (feature `local-embeddings-fastembed`) | model download only |
//!
//! The model always comes from `index.embedding_model_id`, so the dense
//! index and its queries can never disagree on which model produced a
//! vector.
//!
//! # Retry Strategy
//!
//! Network providers retry through [`crate::retry::with_retry`]: 429, 5xx
//! and network errors back off exponentially, other 4xx fail immediately.

mod hashing;

pub use hashing::{HashingEmbedder, DEFAULT_DIMS};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use health_rag_core::embedding::Embedder;
use health_rag_core::{RagError, Result};

use crate::config::Config;
use crate::retry::{post_json, with_retry, CallError, RetryPolicy};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::Config(format!("failed to build HTTP client: {}", e)))
}

pub(crate) fn openai_api_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| RagError::Config("OPENAI_API_KEY environment variable not set".into()))
}

// ============ OpenAI ============

/// OpenAI (or compatible gateway) embeddings API.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// [`RagError::Config`] if `OPENAI_API_KEY` is unset or `embedding.dims` is missing.
    pub fn new(config: &Config) -> Result<Self> {
        let dims = config
            .embedding
            .dims
            .ok_or_else(|| RagError::Config("embedding.dims required for OpenAI provider".into()))?;
        Ok(Self {
            client: http_client(config.embedding.timeout_secs)?,
            api_key: openai_api_key()?,
            base_url: config
                .embedding
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            model: config.index.embedding_model_id.clone(),
            dims,
            retry: config.embedding.retry_policy(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let client = &self.client;
        let api_key = self.api_key.as_str();
        let (url, body) = (url.as_str(), &body);
        let json = with_retry(self.retry, "openai.embeddings", move || {
            post_json(client, url, Some(api_key), body, "OpenAI")
        })
        .await
        .map_err(|e| RagError::Embedding(e.message().to_string()))?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::Embedding("invalid OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::Embedding("invalid OpenAI response: missing embedding".into()))?;
        indexed.push((index, to_vector(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn to_vector(values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| RagError::Embedding("embedding contains a non-numeric value".into()))
        })
        .collect()
}

// ============ Ollama ============

/// Local Ollama instance (`ollama pull <model>` first).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let dims = config
            .embedding
            .dims
            .ok_or_else(|| RagError::Config("embedding.dims required for Ollama provider".into()))?;
        Ok(Self {
            client: http_client(config.embedding.timeout_secs)?,
            base_url: config
                .embedding
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            model: config.index.embedding_model_id.clone(),
            dims,
            retry: config.embedding.retry_policy(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let client = &self.client;
        let base_url = self.base_url.as_str();
        let (url, body) = (url.as_str(), &body);
        let json = with_retry(self.retry, "ollama.embed", move || async move {
            post_json(client, url, None, body, "Ollama")
                .await
                .map_err(|e| match e {
                    CallError::Transient(m) => {
                        CallError::Transient(format!("{} (is Ollama running at {}?)", m, base_url))
                    }
                    other => other,
                })
        })
        .await
        .map_err(|e| RagError::Embedding(e.message().to_string()))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RagError::Embedding("invalid Ollama response: missing embeddings array".into()))?;

    embeddings
        .iter()
        .map(|embedding| {
            let values = embedding
                .as_array()
                .ok_or_else(|| RagError::Embedding("invalid Ollama response: embedding is not an array".into()))?;
            to_vector(values)
        })
        .collect()
}

// ============ Local (fastembed) ============

/// In-process ONNX inference via fastembed. The model is loaded lazily on
/// first use, inside a blocking task, and reused afterwards.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let model_name = config.index.embedding_model_id.clone();
        config_to_fastembed_model(&model_name)?;
        let dims = config.embedding.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "multilingual-e5-base" => 768,
            "multilingual-e5-large" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name,
            dims,
            batch_size: config.embedding.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(RagError::Config(format!(
            "unknown local embedding model: '{}'. Supported models: all-minilm-l6-v2, \
             bge-small-en-v1.5, bge-base-en-v1.5, multilingual-e5-small, \
             multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let fastembed_model = config_to_fastembed_model(&self.model_name)?;
        let slot = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
                )
                .map_err(|e| RagError::Embedding(format!("failed to initialize local embedding model: {}", e)))?;
                *guard = Some(model);
            }
            match guard.as_mut() {
                Some(model) => model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| RagError::Embedding(format!("local embedding failed: {}", e))),
                None => Err(RagError::Embedding("local embedding model unavailable".into())),
            }
        })
        .await
        .map_err(|e| RagError::Embedding(format!("local embedding task failed: {}", e)))?
    }
}

/// Build the embedder named by `embedding.provider`.
///
/// # Errors
///
/// [`RagError::Config`] for an unknown provider, a missing API key, or
/// `"local"` without the `local-embeddings-fastembed` feature.
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedding.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(
            config.index.embedding_model_id.clone(),
            config.embedding.dims.unwrap_or(DEFAULT_DIMS),
        ))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(RagError::Config(
            "local embedding provider requires --features local-embeddings-fastembed".into(),
        )),
        other => Err(RagError::Config(format!("unknown embedding provider: {}", other))),
    }
}
