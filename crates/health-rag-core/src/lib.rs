//! # health-rag core
//!
//! Shared logic for the health-rag pipeline: data models, error taxonomy,
//! chunking, the dense and sparse indices, hybrid fusion, per-session
//! conversation memory, and prompt assembly.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! Network-backed capabilities (embedding, generation) are reached through
//! the [`embedding::Embedder`] and [`generation::Generator`] traits, which
//! the application crate implements.
//!
//! ```text
//! Documents ─▶ chunk::split ─┬─▶ DenseIndex  ─┐
//!                            └─▶ SparseIndex ─┴─▶ HybridRetriever ─▶ context
//! ```

pub mod chunk;
pub mod dense;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod generation;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod sparse;

pub use error::{RagError, Result};
