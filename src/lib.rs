//! # Health RAG
//!
//! Grounded health Q&A over a crawled corpus of medical articles.
//!
//! Documents are split into overlapping chunks and indexed twice, densely
//! (embeddings) and lexically (BM25). Each question retrieves from both,
//! fuses the results, and makes exactly one generation call with the fused
//! context and the session's prior turns.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ crawl JSON │──▶│ Chunk+Embed  │──▶│ Dense  │  Sparse │
//! └────────────┘   └──────────────┘   └────┬────────┬────┘
//!                                          └──fuse──┘
//!                                               ▼
//!                  ┌──────────────┐   ┌──────────────────┐
//!                  │ Session mem. │──▶│   Orchestrator   │──▶ Generator
//!                  └──────────────┘   └────────┬─────────┘
//!                                     ┌────────┴────────┐
//!                                     ▼                 ▼
//!                                ┌─────────┐       ┌─────────┐
//!                                │   CLI   │       │  HTTP   │
//!                                │ (hrag)  │       │ (axum)  │
//!                                └─────────┘       └─────────┘
//! ```
//!
//! Pure retrieval logic lives in [`health_rag_core`]; this crate adds the
//! providers, configuration, persistence, and the two front ends.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`corpus`] | Corpus loading and index build |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama, hashing, fastembed) |
//! | [`generation`] | Chat-completion providers (OpenAI, Ollama) |
//! | [`retry`] | Exponential backoff for provider calls |
//! | [`orchestrator`] | One grounded answer per turn |
//! | [`context`] | Application wiring |
//! | [`sessions`] | Chat-log archive stores |
//! | [`eval`] | Evaluation harness and LLM judge |
//! | [`server`] | HTTP API |
//! | [`search`], [`chat`] | CLI commands |
//! | [`db`], [`migrate`] | SQLite connection and schema |

pub mod chat;
pub mod config;
pub mod context;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod eval;
pub mod generation;
pub mod logging;
pub mod migrate;
pub mod orchestrator;
pub mod retry;
pub mod search;
pub mod server;
pub mod sessions;
