//! Language model integration using Ollama

use crate::config::LlmConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

/// Message role in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Response from text generation
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens_used: Option<u32>,
    pub model: String,
}

/// Trait for language model operations
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate text from a conversation
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse>;
}

/// Ollama client implementation
pub struct OllamaClient {
    client: reqwest::Client,
    config: LlmConfig,
}

/// Ollama API request for generation
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

/// Ollama API options
#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
}

/// Ollama API response for generation
#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    model: String,
    message: Message,
    done: bool,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Get the base URL for API calls
    fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/{}",
            self.config.ollama_url.trim_end_matches('/'),
            endpoint
        )
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse> {
        debug!("Generating text with {} messages", messages.len());

        let request = OllamaGenerateRequest {
            model: self.config.text_model.clone(),
            messages: messages.to_vec(),
            stream: false,
            options: OllamaOptions {
                num_predict: self.config.max_tokens,
                temperature: self.config.temperature,
            },
        };

        let url = self.api_url("chat");
        debug!("Making request to: {}", url);

        let response = timeout(
            Duration::from_secs(self.config.timeout),
            self.client.post(&url).json(&request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Ollama API error: {}", error_text);
            return Err(LlmError::GenerationFailed(error_text).into());
        }

        let ollama_response: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if !ollama_response.done {
            return Err(LlmError::InvalidResponse("Incomplete response".to_string()).into());
        }

        debug!(
            "Generated {} tokens",
            ollama_response.eval_count.unwrap_or(0)
        );

        Ok(GenerationResponse {
            text: ollama_response.message.content,
            tokens_used: ollama_response.eval_count,
            model: ollama_response.model,
        })
    }
}

/// Helper function to create a system message
pub fn system_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::System,
        content: content.into(),
    }
}

/// Helper function to create a user message
pub fn user_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::User,
        content: content.into(),
    }
}

/// Strip a fenced wrapper from an LLM reply that should be raw JSON
pub fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::{
        automock,
        predicate::{self, *},
    };

    #[automock]
    #[async_trait]
    #[allow(dead_code)]
    pub trait MockableLlm: Send + Sync {
        async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse>;
    }

    #[tokio::test]
    async fn test_mocked_generation() {
        let mut mock = MockMockableLlm::new();
        mock.expect_generate()
            .with(predicate::always())
            .times(1)
            .returning(|_| {
                Ok(GenerationResponse {
                    text: "{\"taskType\": \"CODING\"}".to_string(),
                    tokens_used: Some(10),
                    model: "test-model".to_string(),
                })
            });

        let messages = vec![user_message("classify this")];
        let response = mock.generate(&messages).await.unwrap();
        assert!(response.text.contains("CODING"));
        assert_eq!(response.tokens_used, Some(10));
    }

    #[test]
    fn test_message_creation() {
        let system_msg = system_message("You classify developer tasks");
        assert_eq!(system_msg.role, Role::System);

        let user_msg = user_message("Hello");
        assert_eq!(user_msg.role, Role::User);
        assert_eq!(user_msg.content, "Hello");
    }

    #[test]
    fn test_api_url_generation() {
        let config = LlmConfig::default();
        let client = OllamaClient::new(config).unwrap();

        assert_eq!(client.api_url("chat"), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_strip_json_fences() {
        assert_eq!(strip_json_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_json_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_json_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
