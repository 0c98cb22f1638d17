//! Sparse (lexical) index with Okapi BM25 scoring.
//!
//! Scoring is delegated to [`bm25::SearchEngine`] (k1 = 1.2, b = 0.75) with
//! this module's tokenizer plugged in. Documents are keyed by their position
//! in the chunk slice; results are mapped back to `chunk_id` and re-ranked so
//! ties resolve by id.
//!
//! # Tokenization
//!
//! Lowercase, then split on any char that is neither alphanumeric nor a
//! `-`/`_` joiner; joiners are trimmed from token edges, so `glycemic-XYZ`
//! stays one term while `-foo-` becomes `foo`. Hangul counts as alphanumeric.
//! A short English stopword list is dropped. No stemming.

use bm25::{Document, SearchEngine, SearchEngineBuilder, Tokenizer};
use std::collections::HashSet;
use tracing::info;

use crate::models::{Chunk, ScoredChunk};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with", "what", "which", "who", "how", "do", "does",
];

/// Adapter exposing [`tokenize`] to the BM25 engine.
#[derive(Debug, Clone, Copy, Default)]
struct HealthTokenizer;

impl Tokenizer for HealthTokenizer {
    fn tokenize(&self, input_text: &str) -> Vec<String> {
        tokenize(input_text)
    }
}

/// Immutable BM25 index keyed by `chunk_id`.
pub struct SparseIndex {
    engine: SearchEngine<u32, u32, HealthTokenizer>,
    chunk_ids: Vec<String>,
    vocabulary: usize,
}

impl SparseIndex {
    /// Tokenize every chunk and fit the engine to the corpus.
    pub fn build(chunks: &[Chunk]) -> Self {
        let mut vocabulary: HashSet<String> = HashSet::new();
        for chunk in chunks {
            vocabulary.extend(tokenize(&chunk.text));
        }

        let documents: Vec<Document<u32>> = chunks
            .iter()
            .enumerate()
            .map(|(pos, chunk)| Document::new(pos as u32, chunk.text.as_str()))
            .collect();
        let engine = SearchEngineBuilder::<u32, u32, HealthTokenizer>::with_tokenizer_and_documents(
            HealthTokenizer,
            documents,
        )
        .build();

        info!(chunks = chunks.len(), terms = vocabulary.len(), "sparse index built");
        Self {
            engine,
            chunk_ids: chunks.iter().map(|c| c.chunk_id.clone()).collect(),
            vocabulary: vocabulary.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    /// Number of distinct terms in the vocabulary.
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary
    }

    /// Top `k` chunks by BM25 score.
    ///
    /// Only chunks sharing at least one term with the query are returned,
    /// ordered by descending score with ties by ascending `chunk_id`. An empty
    /// or all-stopword query returns an empty list.
    pub fn query(&self, text: &str, k: usize) -> Vec<ScoredChunk> {
        if k == 0 || self.is_empty() || tokenize(text).is_empty() {
            return Vec::new();
        }

        // The engine orders equal scores arbitrarily, so take every match and re-rank.
        let rows = self
            .engine
            .search(text, self.len())
            .into_iter()
            .filter_map(|hit| {
                self.chunk_ids
                    .get(hit.document.id as usize)
                    .map(|id| ScoredChunk::new(id.clone(), f64::from(hit.score)))
            })
            .collect();

        ScoredChunk::rank(rows, k)
    }
}

/// Split text into lowercase index terms, dropping stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .map(|raw| raw.trim_matches(|c: char| c == '-' || c == '_'))
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split;
    use crate::models::{Document, DocumentMetadata};

    fn index_of(texts: &[&str]) -> (SparseIndex, Vec<Chunk>) {
        let docs: Vec<Document> = texts
            .iter()
            .map(|t| Document {
                page_content: t.to_string(),
                metadata: DocumentMetadata::default(),
            })
            .collect();
        let chunks = split(&docs, 1000, 0).unwrap();
        (SparseIndex::build(&chunks), chunks)
    }

    #[test]
    fn test_tokenize_keeps_hyphenated_terms() {
        assert_eq!(tokenize("The glycemic-XYZ index!"), vec!["glycemic-xyz", "index"]);
        assert_eq!(tokenize("--edge-- _x_"), vec!["edge", "x"]);
    }

    #[test]
    fn test_tokenize_hangul() {
        assert_eq!(tokenize("혈당 관리, 식사요법."), vec!["혈당", "관리", "식사요법"]);
    }

    #[test]
    fn test_unique_term_found() {
        let (index, chunks) = index_of(&[
            "Whole grains help keep blood sugar stable.",
            "Our glycemic-XYZ protocol lowers post-meal spikes.",
            "Walking after meals improves insulin sensitivity.",
        ]);
        let hits = index.query("glycemic-XYZ", 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, chunks[1].chunk_id);
    }

    #[test]
    fn test_empty_and_stopword_queries() {
        let (index, _) = index_of(&["blood sugar", "the diet"]);
        assert!(index.query("", 5).is_empty());
        assert!(index.query("   ", 5).is_empty());
        assert!(index.query("the and of", 5).is_empty());
    }

    #[test]
    fn test_unknown_terms_return_nothing() {
        let (index, _) = index_of(&["blood sugar"]);
        assert!(index.query("cardiology", 5).is_empty());
    }

    #[test]
    fn test_rarer_term_scores_higher() {
        let (index, chunks) = index_of(&[
            "insulin insulin diet",
            "insulin exercise",
            "insulin sleep",
            "diet sleep",
        ]);
        let hits = index.query("exercise insulin", 4);
        assert_eq!(hits[0].chunk_id, chunks[1].chunk_id);
    }

    #[test]
    fn test_ties_broken_by_chunk_id() {
        let (index, _) = index_of(&["fiber", "fiber", "fiber"]);
        let ids: Vec<String> = index.query("fiber", 3).into_iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, vec!["00000-00000", "00001-00000", "00002-00000"]);
    }

    #[test]
    fn test_vocabulary_excludes_stopwords() {
        let (index, _) = index_of(&["The insulin dose", "insulin and diet"]);
        assert_eq!(index.vocabulary_size(), 3);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_empty_index() {
        let index = SparseIndex::build(&[]);
        assert!(index.is_empty());
        assert!(index.query("anything", 3).is_empty());
    }
}
