//! Error taxonomy for the retrieval and generation pipeline.
//!
//! Build-time failures ([`RagError::Config`], [`RagError::Embedding`]) are
//! fatal at startup. Per-turn failures are returned to the caller as typed
//! values and never leave a partially-updated conversation behind.

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid chunking, index, or request parameters.
    #[error("config error: {0}")]
    Config(String),

    /// The embedding capability was unavailable or returned a malformed response.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Unexpected failure while querying or fusing the indices.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// The generation capability failed after retries were exhausted.
    #[error("generation error: {0}")]
    Generation(String),

    /// A session id was used before it was created. Indicates a programming error.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// The chat-log archive collaborator rejected a call.
    #[error("session store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// Stable machine-readable code, used in HTTP error bodies and eval records.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Config(_) => "config",
            RagError::Embedding(_) => "embedding",
            RagError::Retrieval(_) => "retrieval",
            RagError::Generation(_) => "generation",
            RagError::UnknownSession(_) => "unknown_session",
            RagError::Store(_) => "store",
            RagError::Io(_) => "io",
            RagError::Json(_) => "json",
        }
    }
}
