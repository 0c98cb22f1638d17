//! Generation capability trait and request types.
//!
//! The orchestrator builds a [`GenerationRequest`] and hands it to a
//! [`Generator`]. Concrete chat-completion backends live in the application
//! crate; they are responsible for their own retry policy and must report
//! final failure as [`RagError::Generation`](crate::RagError::Generation).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// A single, complete generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    /// `None` leaves decoding at the provider default.
    pub temperature: Option<f32>,
}

/// Trait for chat-completion backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o"`).
    fn model_name(&self) -> &str;
    /// Run one completion and return the assistant text.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}
