//! Hybrid retrieval: dense + sparse queries fused into one ranked context set.
//!
//! # Fusion Algorithm
//!
//! 1. Query the dense and sparse indices independently, `top_k` each.
//! 2. Normalize: dense cosine is clamped to `[0, 1]`; sparse BM25 is divided
//!    by the best BM25 score in its own list (top hit = `1.0`).
//! 3. Union by `chunk_id`. A chunk found by both gets `origin = both` and
//!    `score = dense + sparse`; single-origin chunks keep their own score.
//! 4. Sort by score (desc), `both` before single-origin, `chunk_id` (asc).
//! 5. Truncate to `2 × top_k`.
//!
//! `top_k` is the per-sub-retriever budget, so the fused list is bounded by
//! twice that value.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::chunk;
use crate::dense::DenseIndex;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::models::{Chunk, Document, Origin, RetrievalResult, ScoredChunk};
use crate::sparse::SparseIndex;

/// A fused hit before chunk text is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub chunk_id: String,
    pub score: f64,
    pub origin: Origin,
    pub dense_score: Option<f64>,
    pub sparse_score: Option<f64>,
}

/// Fuse two normalized result lists.
///
/// Inputs are expected to be normalized already (see [`normalize_dense`]
/// and [`normalize_sparse`]). Output never repeats a `chunk_id` and holds
/// at most `2 × top_k` hits.
pub fn fuse(dense: &[ScoredChunk], sparse: &[ScoredChunk], top_k: usize) -> Vec<FusedHit> {
    let mut merged: HashMap<&str, FusedHit> = HashMap::new();

    for d in dense {
        merged.entry(d.chunk_id.as_str()).or_insert_with(|| FusedHit {
            chunk_id: d.chunk_id.clone(),
            score: d.score,
            origin: Origin::Dense,
            dense_score: Some(d.score),
            sparse_score: None,
        });
    }

    for s in sparse {
        merged
            .entry(s.chunk_id.as_str())
            .and_modify(|hit| {
                if hit.sparse_score.is_none() {
                    hit.score += s.score;
                    hit.sparse_score = Some(s.score);
                    hit.origin = Origin::Both;
                }
            })
            .or_insert_with(|| FusedHit {
                chunk_id: s.chunk_id.clone(),
                score: s.score,
                origin: Origin::Sparse,
                dense_score: None,
                sparse_score: Some(s.score),
            });
    }

    let mut hits: Vec<FusedHit> = merged.into_values().collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| (b.origin == Origin::Both).cmp(&(a.origin == Origin::Both)))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(top_k.saturating_mul(2));
    hits
}

/// Clamp cosine similarities into `[0, 1]`.
pub fn normalize_dense(rows: &[ScoredChunk]) -> Vec<ScoredChunk> {
    rows.iter()
        .map(|r| ScoredChunk::new(r.chunk_id.clone(), r.score.clamp(0.0, 1.0)))
        .collect()
}

/// Divide BM25 scores by the best score in the list.
///
/// If the best score is not positive, every row scores `1.0`.
pub fn normalize_sparse(rows: &[ScoredChunk]) -> Vec<ScoredChunk> {
    let max = rows.iter().map(|r| r.score).fold(f64::NEG_INFINITY, f64::max);
    rows.iter()
        .map(|r| {
            let norm = if max > f64::EPSILON { r.score / max } else { 1.0 };
            ScoredChunk::new(r.chunk_id.clone(), norm)
        })
        .collect()
}

/// Read-only hybrid index: the chunk table plus both sub-indices.
///
/// Built once, then shared across concurrent queries behind an `Arc`.
pub struct HybridRetriever {
    chunks: Vec<Chunk>,
    by_id: HashMap<String, usize>,
    dense: DenseIndex,
    sparse: SparseIndex,
    embedder: Arc<dyn Embedder>,
}

impl HybridRetriever {
    /// Assemble a retriever from prebuilt parts.
    ///
    /// Fails with [`RagError::Config`] if two chunks share an id.
    pub fn new(
        chunks: Vec<Chunk>,
        dense: DenseIndex,
        sparse: SparseIndex,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(chunks.len());
        for (pos, c) in chunks.iter().enumerate() {
            if by_id.insert(c.chunk_id.clone(), pos).is_some() {
                return Err(RagError::Config(format!("duplicate chunk_id: {}", c.chunk_id)));
            }
        }
        Ok(Self {
            chunks,
            by_id,
            dense,
            sparse,
            embedder,
        })
    }

    /// Chunk the documents and build both indices.
    pub async fn build(
        documents: &[Document],
        chunk_size: usize,
        overlap: usize,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Result<Self> {
        let chunks = chunk::split(documents, chunk_size, overlap)?;
        let dense = DenseIndex::build(&chunks, embedder.as_ref(), batch_size).await?;
        let sparse = SparseIndex::build(&chunks);
        Self::new(chunks, dense, sparse, embedder)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.by_id.get(chunk_id).map(|&pos| &self.chunks[pos])
    }

    pub fn dense(&self) -> &DenseIndex {
        &self.dense
    }

    pub fn sparse(&self) -> &SparseIndex {
        &self.sparse
    }

    /// Fused, deduplicated context for `query`; at most `2 × top_k` results.
    ///
    /// If the dense side fails (e.g. the query cannot be embedded) the
    /// sparse side is still served. Empty indices yield an empty list.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        if top_k == 0 {
            return Err(RagError::Config("top_k must be >= 1".into()));
        }
        if query.trim().is_empty() || (self.dense.is_empty() && self.sparse.is_empty()) {
            return Ok(Vec::new());
        }

        let dense_rows = match self.dense.query(self.embedder.as_ref(), query, top_k).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "dense retrieval failed, continuing with sparse only");
                Vec::new()
            }
        };
        let sparse_rows = self.sparse.query(query, top_k);

        let hits = fuse(&normalize_dense(&dense_rows), &normalize_sparse(&sparse_rows), top_k);
        debug!(
            dense = dense_rows.len(),
            sparse = sparse_rows.len(),
            fused = hits.len(),
            "hybrid search"
        );

        hits.into_iter()
            .map(|hit| {
                let chunk = self.chunk(&hit.chunk_id).cloned().ok_or_else(|| {
                    RagError::Retrieval(format!("chunk {} missing from chunk table", hit.chunk_id))
                })?;
                Ok(RetrievalResult {
                    chunk_id: hit.chunk_id,
                    chunk,
                    score: hit.score,
                    origin: hit.origin,
                })
            })
            .collect()
    }
}
