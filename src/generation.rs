//! Chat-completion providers.
//!
//! | `generation.provider` | Type | Endpoint |
//! |-----------------------|------|----------|
//! | `"openai"` | [`OpenAIGenerator`] | `POST {url}/chat/completions` |
//! | `"ollama"` | [`OllamaGenerator`] | `POST {url}/api/chat` (non-streaming) |
//!
//! Both retry transient failures with the policy from `[generation]` and
//! report final failure as [`RagError::Generation`].

use async_trait::async_trait;
use std::sync::Arc;

use health_rag_core::generation::{GenerationRequest, Generator};
use health_rag_core::{RagError, Result};

use crate::config::Config;
use crate::embedding::{http_client, openai_api_key};
use crate::retry::{post_json, with_retry, RetryPolicy};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OpenAIGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAIGenerator {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: http_client(config.generation.timeout_secs)?,
            api_key: openai_api_key()?,
            base_url: config
                .generation
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            model: config.index.generation_model_id.clone(),
            retry: config.generation.retry_policy(),
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let client = &self.client;
        let api_key = self.api_key.as_str();
        let (url, body) = (url.as_str(), &body);
        let json = with_retry(self.retry, "openai.chat", move || {
            post_json(client, url, Some(api_key), body, "OpenAI")
        })
        .await
        .map_err(|e| RagError::Generation(e.message().to_string()))?;
        parse_openai_completion(&json)
    }
}

/// `choices[0].message.content`
fn parse_openai_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| RagError::Generation("invalid OpenAI response: missing choices[0].message.content".into()))
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl OllamaGenerator {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: http_client(config.generation.timeout_secs)?,
            base_url: config
                .generation
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            model: config.index.generation_model_id.clone(),
            retry: config.generation.retry_policy(),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "stream": false,
        });
        if let Some(t) = request.temperature {
            body["options"] = serde_json::json!({ "temperature": t });
        }

        let client = &self.client;
        let (url, body) = (url.as_str(), &body);
        let json = with_retry(self.retry, "ollama.chat", move || {
            post_json(client, url, None, body, "Ollama")
        })
        .await
        .map_err(|e| RagError::Generation(e.message().to_string()))?;

        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| RagError::Generation("invalid Ollama response: missing message.content".into()))
    }
}

/// Build the generator named by `generation.provider`.
pub fn create_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    match config.generation.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => Err(RagError::Config(format!("unknown generation provider: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use health_rag_core::generation::ChatMessage;
    use std::path::PathBuf;

    #[test]
    fn test_parse_openai_completion() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "잡곡밥을 권합니다."}}]
        });
        assert_eq!(parse_openai_completion(&json).unwrap(), "잡곡밥을 권합니다.");
        let err = parse_openai_completion(&serde_json::json!({"choices": []})).unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
    }

    #[test]
    fn test_messages_serialize_with_lowercase_roles() {
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        let json = serde_json::json!({ "messages": messages });
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
    }

    #[test]
    fn test_create_ollama_generator_needs_no_key() {
        let cfg = parse_config(
            "[index]\nembedding_model_id = \"e\"\ngeneration_model_id = \"llama3\"\n\n[generation]\nprovider = \"ollama\"\n",
            PathBuf::new(),
        )
        .unwrap();
        let generator = create_generator(&cfg).unwrap();
        assert_eq!(generator.model_name(), "llama3");
    }
}
