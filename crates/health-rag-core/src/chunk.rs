//! Fixed-window text chunker with overlap.
//!
//! Splits each [`Document`]'s `page_content` into overlapping [`Chunk`]s of
//! at most `chunk_size` characters. Consecutive chunks of one document share
//! exactly `overlap` characters, so no content is dropped and the original
//! text can be rebuilt with [`reassemble`].
//!
//! Sizes and offsets are counted in chars (Unicode scalar values), so Korean
//! text is never cut inside a code point.
//!
//! # Algorithm
//!
//! 1. `step = chunk_size - overlap`.
//! 2. Chunk `k` covers chars `[k × step, min(k × step + chunk_size, L))`.
//! 3. Stop after the first chunk that reaches the end of the text.
//!
//! A document of length `L > overlap` yields `ceil((L - overlap) / step)`
//! chunks. A non-empty document no longer than `overlap` yields one chunk;
//! an empty document yields none.
//!
//! Each chunk id is `"{document:05}-{chunk:05}"`, which is unique within a
//! build, identical across runs for identical input, and sorts in
//! (document, position) order.
//!
//! # Example
//!
//! ```rust
//! use health_rag_core::chunk::{reassemble, split};
//! use health_rag_core::models::{Document, DocumentMetadata};
//!
//! let doc = Document {
//!     page_content: "abcdefghij".to_string(),
//!     metadata: DocumentMetadata::default(),
//! };
//! let chunks = split(&[doc], 4, 1).unwrap();
//! assert_eq!(chunks.len(), 3); // abcd, defg, ghij
//! assert_eq!(reassemble(&chunks, 1), "abcdefghij");
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document, DocumentRef};

/// Split documents into overlapping chunks.
///
/// Deterministic: the same documents and parameters always produce the same
/// chunk sequence, texts, and ids.
///
/// # Errors
///
/// [`RagError::Config`] if `chunk_size == 0` or `overlap >= chunk_size`.
pub fn split(documents: &[Document], chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    validate_params(chunk_size, overlap)?;

    let mut chunks = Vec::new();
    for (doc_index, doc) in documents.iter().enumerate() {
        let doc_ref = DocumentRef {
            index: doc_index,
            title: doc.metadata.title.clone(),
            source_url: doc.metadata.source_url.clone(),
        };
        chunks.extend(split_text(&doc_ref, &doc.page_content, chunk_size, overlap));
    }
    Ok(chunks)
}

/// Check chunking parameters without splitting anything.
pub fn validate_params(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::Config("chunk_size must be > 0".into()));
    }
    if overlap >= chunk_size {
        return Err(RagError::Config(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

/// Rebuild a document's text from its chunks.
///
/// `chunks` must be the chunks of a single document, in order. The first
/// chunk is taken whole; every following chunk contributes everything after
/// its leading `overlap` chars.
pub fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}

fn split_text(doc_ref: &DocumentRef, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let step = chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + chunk_size).min(total);
        let piece: String = chars[start..end].iter().collect();
        chunks.push(make_chunk(doc_ref, chunks.len(), start, piece));
        if end == total {
            break;
        }
        start += step;
    }
    chunks
}

fn make_chunk(doc_ref: &DocumentRef, index: usize, offset: usize, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        chunk_id: format!("{:05}-{:05}", doc_ref.index, index),
        text,
        source_document_ref: doc_ref.clone(),
        offset,
        chunk_index: index,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentMetadata;
    use std::collections::HashSet;

    fn doc(text: &str) -> Document {
        Document {
            page_content: text.to_string(),
            metadata: DocumentMetadata {
                title: "t".into(),
                source_url: "https://example.org".into(),
                ..Default::default()
            },
        }
    }

    fn expected_count(len: usize, size: usize, overlap: usize) -> usize {
        if len == 0 {
            0
        } else if len <= overlap {
            1
        } else {
            (len - overlap).div_ceil(size - overlap)
        }
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = split(&[doc("abc")], 5, 5).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
        assert!(matches!(split(&[doc("abc")], 0, 0), Err(RagError::Config(_))));
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split(&[doc("hello")], 100, 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello");
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn test_empty_document_yields_no_chunks() {
        let chunks = split(&[doc("")], 10, 2).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_consecutive_chunks_share_overlap() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = split(&[doc(text)], 8, 3).unwrap();
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let tail: String = prev[prev.len() - 3..].iter().collect();
            let head: String = pair[1].text.chars().take(3).collect();
            assert_eq!(tail, head);
            assert_eq!(pair[1].offset, pair[0].offset + 5);
        }
    }

    #[test]
    fn test_chunk_count_formula() {
        for len in [1usize, 3, 7, 8, 9, 20, 57, 100] {
            let text: String = std::iter::repeat('x').take(len).collect();
            for (size, overlap) in [(8, 0), (8, 3), (5, 4), (10, 9), (1, 0)] {
                let chunks = split(&[doc(&text)], size, overlap).unwrap();
                assert_eq!(
                    chunks.len(),
                    expected_count(len, size, overlap),
                    "len={} size={} overlap={}",
                    len,
                    size,
                    overlap
                );
            }
        }
    }

    #[test]
    fn test_reassemble_reproduces_text() {
        let texts = [
            "Short.",
            "당뇨병 환자는 규칙적인 식사와 운동으로 혈당을 관리해야 합니다. 하루 세 끼를 일정한 시간에 드세요.",
            "┌──────────┐\n│ table    │\n└──────────┘ mixed ascii and box drawing",
        ];
        for text in texts {
            for (size, overlap) in [(4, 1), (7, 3), (16, 0), (3, 2)] {
                let chunks = split(&[doc(text)], size, overlap).unwrap();
                assert_eq!(reassemble(&chunks, overlap), text, "size={} overlap={}", size, overlap);
            }
        }
    }

    #[test]
    fn test_chunk_ids_unique_across_corpus() {
        let docs = vec![doc("alpha beta gamma delta"), doc("epsilon zeta"), doc("eta theta iota kappa lambda")];
        let chunks = split(&docs, 6, 2).unwrap();
        let ids: HashSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids.len(), chunks.len());
    }

    #[test]
    fn test_deterministic() {
        let docs = vec![doc("Alpha Beta Gamma Delta"), doc("Epsilon")];
        let a = split(&docs, 5, 2).unwrap();
        let b = split(&docs, 5, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_ids_sort_in_document_order() {
        let docs: Vec<Document> = (0..12).map(|i| doc(&format!("document number {}", i))).collect();
        let chunks = split(&docs, 6, 1).unwrap();
        let mut sorted = chunks.clone();
        sorted.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        assert_eq!(sorted, chunks);
    }
}
