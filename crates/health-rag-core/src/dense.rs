//! Dense (vector-similarity) index over chunk embeddings.
//!
//! Built once from a chunk list through an [`Embedder`], then read-only.
//! Queries are brute-force cosine similarity over every stored vector,
//! which is adequate for a corpus of a few thousand chunks.

use tracing::{debug, info};

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{RagError, Result};
use crate::models::{Chunk, ScoredChunk};

#[derive(Debug, Clone)]
struct DenseEntry {
    chunk_id: String,
    vector: Vec<f32>,
}

/// Immutable vector index keyed by `chunk_id`.
#[derive(Debug, Clone, Default)]
pub struct DenseIndex {
    entries: Vec<DenseEntry>,
    dims: usize,
    model: String,
}

impl DenseIndex {
    /// Embed every chunk and build the index.
    ///
    /// Texts are sent to the embedder in batches of `batch_size`. The build
    /// is all-or-nothing: a failed batch, a short response, or a vector of
    /// the wrong dimensionality aborts with [`RagError::Embedding`].
    pub async fn build(chunks: &[Chunk], embedder: &dyn Embedder, batch_size: usize) -> Result<Self> {
        let dims = embedder.dims();
        let batch_size = batch_size.max(1);
        let mut entries = Vec::with_capacity(chunks.len());

        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed(&texts).await.map_err(into_embedding_error)?;

            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }

            for (chunk, vector) in batch.iter().zip(vectors) {
                if vector.len() != dims {
                    return Err(RagError::Embedding(format!(
                        "vector for chunk {} has {} dims, expected {}",
                        chunk.chunk_id,
                        vector.len(),
                        dims
                    )));
                }
                entries.push(DenseEntry {
                    chunk_id: chunk.chunk_id.clone(),
                    vector,
                });
            }
            debug!(batch = batch_no, size = batch.len(), "embedded batch");
        }

        info!(chunks = entries.len(), dims, model = embedder.model_name(), "dense index built");
        Ok(Self {
            entries,
            dims,
            model: embedder.model_name().to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Top `k` chunks by cosine similarity to `query_vec`.
    ///
    /// Ordered by descending similarity, ties by ascending `chunk_id`.
    pub fn query_vector(&self, query_vec: &[f32], k: usize) -> Vec<ScoredChunk> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }
        let rows = self
            .entries
            .iter()
            .map(|e| ScoredChunk::new(e.chunk_id.clone(), cosine_similarity(query_vec, &e.vector) as f64))
            .collect();
        ScoredChunk::rank(rows, k)
    }

    /// Embed `text` and return the top `k` chunks.
    ///
    /// A blank query or an empty index returns an empty list without
    /// calling the embedder.
    pub async fn query(&self, embedder: &dyn Embedder, text: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if text.trim().is_empty() || self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let vectors = embedder
            .embed(&[text.to_string()])
            .await
            .map_err(into_embedding_error)?;
        let query_vec = vectors
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("empty embedding response".into()))?;
        Ok(self.query_vector(&query_vec, k))
    }
}

fn into_embedding_error(err: RagError) -> RagError {
    match err {
        RagError::Embedding(_) => err,
        other => RagError::Embedding(other.to_string()),
    }
}
