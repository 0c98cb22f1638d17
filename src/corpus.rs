//! Corpus loading and index build.
//!
//! The crawl collaborator writes one JSON array of documents per source
//! (`[{ "page_content": ..., "metadata": { "title", "source_url", ... } }]`).
//! Files are concatenated in `corpus.paths` order, which fixes each
//! document's index and therefore every `chunk_id`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use health_rag_core::embedding::Embedder;
use health_rag_core::fusion::HybridRetriever;
use health_rag_core::models::Document;
use health_rag_core::{RagError, Result};

use crate::config::Config;

/// Read one crawl output file.
pub fn load_corpus_file(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RagError::Config(format!("failed to read corpus file {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| RagError::Config(format!("invalid corpus file {}: {}", path.display(), e)))
}

/// Read and concatenate every corpus file, in order.
pub fn load_corpus(paths: &[PathBuf]) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for path in paths {
        let docs = load_corpus_file(path)?;
        info!(path = %path.display(), documents = docs.len(), "loaded corpus file");
        documents.extend(docs);
    }
    Ok(documents)
}

/// Load the configured corpus and build the hybrid index.
pub async fn build_retriever(config: &Config, embedder: Arc<dyn Embedder>) -> Result<HybridRetriever> {
    let documents = load_corpus(&config.corpus_paths())?;
    let started = Instant::now();
    let retriever = HybridRetriever::build(
        &documents,
        config.index.chunk_size,
        config.index.overlap,
        embedder,
        config.embedding.batch_size,
    )
    .await?;
    info!(
        documents = documents.len(),
        chunks = retriever.chunks().len(),
        vocabulary = retriever.sparse().vocabulary_size(),
        model = retriever.dense().model(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "index built"
    );
    Ok(retriever)
}

/// `hrag index`: build the index and print a summary.
pub async fn run_index(config: &Config) -> anyhow::Result<()> {
    let embedder = crate::embedding::create_embedder(config)?;
    let started = Instant::now();
    let retriever = build_retriever(config, embedder).await?;

    let documents = retriever
        .chunks()
        .iter()
        .map(|c| c.source_document_ref.index)
        .collect::<std::collections::BTreeSet<_>>()
        .len();

    println!("Health RAG — Index");
    println!("==================");
    println!();
    for path in config.corpus_paths() {
        println!("  Corpus:      {}", path.display());
    }
    println!("  Documents:   {}", documents);
    println!("  Chunks:      {}", retriever.chunks().len());
    println!(
        "  Chunking:    {} chars, {} overlap",
        config.index.chunk_size, config.index.overlap
    );
    println!(
        "  Dense:       {} vectors × {} dims ({})",
        retriever.dense().len(),
        retriever.dense().dims(),
        retriever.dense().model()
    );
    println!("  Sparse:      {} terms", retriever.sparse().vocabulary_size());
    println!("  Built in:    {:.2}s", started.elapsed().as_secs_f64());
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_corpus(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_corpus_concatenates_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = write_corpus(
            tmp.path(),
            "a.json",
            r#"[{"page_content": "first", "metadata": {"title": "A", "source_url": "https://a"}}]"#,
        );
        let b = write_corpus(
            tmp.path(),
            "b.json",
            r#"[{"page_content": "second", "metadata": {"title": "B"}},
                {"page_content": "third", "metadata": {}}]"#,
        );
        let docs = load_corpus(&[a, b]).unwrap();
        let contents: Vec<&str> = docs.iter().map(|d| d.page_content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(docs[1].metadata.source_url, "");
    }

    #[test]
    fn test_invalid_corpus_is_config_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bad = write_corpus(tmp.path(), "bad.json", "{ not json");
        assert!(matches!(load_corpus_file(&bad), Err(RagError::Config(_))));
        assert!(matches!(
            load_corpus_file(&tmp.path().join("missing.json")),
            Err(RagError::Config(_))
        ));
    }
}
