//! `hrag search`: fused retrieval from the command line, no generation.

use anyhow::{bail, Result};

use health_rag_core::models::RetrievalResult;

use crate::config::Config;
use crate::corpus;
use crate::embedding;

const EXCERPT_CHARS: usize = 160;

pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    let top_k = top_k.unwrap_or(config.index.top_k);
    if top_k == 0 {
        bail!("--top-k must be >= 1");
    }

    let embedder = embedding::create_embedder(config)?;
    let retriever = corpus::build_retriever(config, embedder).await?;
    let results = retriever.search(query, top_k).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    print_results(&results);
    Ok(())
}

pub fn print_results(results: &[RetrievalResult]) {
    for (i, result) in results.iter().enumerate() {
        let source = &result.chunk.source_document_ref;
        let title = if source.title.is_empty() {
            "(untitled)"
        } else {
            source.title.as_str()
        };
        println!("{}. [{:.2}] {} ({:?})", i + 1, result.score, title, result.origin);
        if !source.source_url.is_empty() {
            println!("    url: {}", source.source_url);
        }
        println!("    excerpt: \"{}\"", excerpt(&result.chunk.text));
        println!("    id: {}", result.chunk_id);
        println!();
    }
}

fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_flattens_and_truncates_on_chars() {
        assert_eq!(excerpt("a\nb "), "a b");
        let long = "가".repeat(EXCERPT_CHARS + 10);
        let out = excerpt(&long);
        assert_eq!(out.chars().count(), EXCERPT_CHARS + 1);
        assert!(out.ends_with('…'));
    }
}
