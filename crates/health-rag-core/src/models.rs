//! Core data models used throughout health-rag.
//!
//! These types represent the crawled articles, the chunks derived from
//! them, retrieval results, and conversation turns that flow through the
//! indexing and answering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A crawled article as produced by the crawl collaborator.
///
/// Serialized form matches the crawl output: one JSON object per article,
/// stored as a JSON array per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Back-reference from a chunk to the document it was cut from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Position of the document in the build input.
    pub index: usize,
    pub title: String,
    pub source_url: String,
}

/// A bounded span of one document's text; the unit indexed and retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within one index build. Lexicographic order follows
    /// (document, position) order.
    pub chunk_id: String,
    pub text: String,
    pub source_document_ref: DocumentRef,
    /// Offset of the first char of `text` within the document, in chars.
    pub offset: usize,
    /// Position of this chunk within its document, starting at 0.
    pub chunk_index: usize,
    /// Hex SHA-256 of `text`.
    pub hash: String,
}

/// One row of a sub-index query: a chunk id and its raw score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f64,
}

impl ScoredChunk {
    pub fn new(chunk_id: impl Into<String>, score: f64) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score,
        }
    }

    /// Sort by descending score, ties by ascending `chunk_id`, and keep the first `k`.
    pub fn rank(mut rows: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
        rows.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        rows.truncate(k);
        rows
    }
}

/// Which sub-retriever(s) matched a fused result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Dense,
    Sparse,
    Both,
}

/// A fused retrieval hit handed to prompt assembly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub chunk: Chunk,
    pub score: f64,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user message or one assistant response within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    /// Position within the session; assigned by session memory on append.
    pub sequence_no: u64,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            sequence_no: 0,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_deserializes_crawl_shape() {
        let json = r#"{
            "page_content": "당뇨병 식사요법",
            "metadata": {
                "title": "당뇨병",
                "source_url": "https://example.org/a/1",
                "author": "영양팀",
                "tags": ["당뇨", "식단"]
            }
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.metadata.tags.len(), 2);
        assert_eq!(doc.metadata.author, "영양팀");
    }

    #[test]
    fn test_document_missing_optional_metadata() {
        let json = r#"{"page_content": "x", "metadata": {"title": "t", "source_url": "u"}}"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert!(doc.metadata.author.is_empty());
        assert!(doc.metadata.tags.is_empty());
    }

    #[test]
    fn test_origin_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Origin::Both).unwrap(), "\"both\"");
        let origin: Origin = serde_json::from_str("\"sparse\"").unwrap();
        assert_eq!(origin, Origin::Sparse);
    }
}
