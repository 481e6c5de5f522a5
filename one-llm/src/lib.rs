//! LLM provider boundary for the One bot.
//!
//! Provides a unified interface for chat-completion backends plus a
//! structured-JSON generation helper with explicit timeout handling.
//! The engine never talks HTTP directly — everything goes through
//! [`Provider`].

#![warn(clippy::all)]

mod compatible;

pub use compatible::CompatibleProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Provider Trait
// ============================================================================

/// Unified interface for LLM providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Send a chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Error from a provider.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
    pub status_code: Option<u16>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.provider, self.model, self.message)
    }
}

impl std::error::Error for ProviderError {}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response format constraint for the completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Force the model to emit a single JSON object.
    JsonObject,
}

/// Unified chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,
    /// Messages in the conversation
    pub messages: Vec<Message>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    /// Temperature (0.0 - 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// System prompt (if not in messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Response format constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    /// Create a user-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Unified chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider name
    pub provider: String,
    /// Model used
    pub model: String,
    /// Response content
    pub content: String,
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Response latency in milliseconds
    pub latency_ms: u64,
}

// ============================================================================
// Structured generation
// ============================================================================

/// Parameters for one structured-JSON generation call.
#[derive(Debug, Clone)]
pub struct GenerateSpec {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: i64,
    pub timeout: Duration,
}

impl GenerateSpec {
    /// Spec for classification calls (low temperature, short output).
    pub fn classify(model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            model: model.into(),
            temperature: 0.3,
            max_tokens: 500,
            timeout,
        }
    }

    /// Spec for reply-generation calls (higher temperature, longer output).
    pub fn reply(model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            model: model.into(),
            temperature: 0.7,
            max_tokens: 800,
            timeout,
        }
    }

    /// Override the temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Call the generator with a system prompt and user text, forcing a JSON
/// object response, and parse it.
///
/// A timed-out or failed call returns `Err` — callers fall back to their
/// documented defaults; nothing is retried here.
pub async fn generate_json(
    provider: &Arc<dyn Provider>,
    spec: &GenerateSpec,
    system_prompt: &str,
    user_text: &str,
) -> Result<serde_json::Value, ProviderError> {
    let request = ChatRequest {
        model: spec.model.clone(),
        messages: vec![Message::user(user_text)],
        max_tokens: Some(spec.max_tokens),
        temperature: Some(spec.temperature),
        system: Some(system_prompt.to_string()),
        response_format: Some(ResponseFormat::JsonObject),
    };

    let response = match tokio::time::timeout(spec.timeout, provider.chat(request)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ProviderError {
                provider: provider.name().to_string(),
                model: spec.model.clone(),
                message: format!("Call timed out after {:?}", spec.timeout),
                status_code: None,
            });
        }
    };

    serde_json::from_str(&response.content).map_err(|e| ProviderError {
        provider: response.provider.clone(),
        model: response.model.clone(),
        message: format!("Malformed JSON response: {e}"),
        status_code: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoJsonProvider {
        payload: String,
    }

    #[async_trait]
    impl Provider for EchoJsonProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            assert_eq!(request.response_format, Some(ResponseFormat::JsonObject));
            Ok(ChatResponse {
                provider: "echo".into(),
                model: request.model,
                content: self.payload.clone(),
                finish_reason: Some("stop".into()),
                latency_ms: 1,
            })
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl Provider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ChatResponse {
                provider: "slow".into(),
                model: request.model,
                content: "{}".into(),
                finish_reason: None,
                latency_ms: 5000,
            })
        }
    }

    #[tokio::test]
    async fn test_generate_json_parses_object() {
        let provider: Arc<dyn Provider> = Arc::new(EchoJsonProvider {
            payload: r#"{"main_intent": "general"}"#.into(),
        });
        let spec = GenerateSpec::classify("test-model", Duration::from_secs(1));
        let value = generate_json(&provider, &spec, "system", "hello")
            .await
            .unwrap();
        assert_eq!(value["main_intent"], "general");
    }

    #[tokio::test]
    async fn test_generate_json_rejects_malformed() {
        let provider: Arc<dyn Provider> = Arc::new(EchoJsonProvider {
            payload: "not json".into(),
        });
        let spec = GenerateSpec::reply("test-model", Duration::from_secs(1));
        let err = generate_json(&provider, &spec, "system", "hello")
            .await
            .unwrap_err();
        assert!(err.message.contains("Malformed JSON"));
    }

    #[tokio::test]
    async fn test_generate_json_times_out() {
        let provider: Arc<dyn Provider> = Arc::new(SlowProvider);
        let spec = GenerateSpec::classify("test-model", Duration::from_millis(100));
        let err = generate_json(&provider, &spec, "system", "hello")
            .await
            .unwrap_err();
        assert!(err.message.contains("timed out"));
    }

    #[test]
    fn test_response_format_serialization() {
        let json = serde_json::to_string(&ResponseFormat::JsonObject).unwrap();
        assert_eq!(json, r#"{"type":"json_object"}"#);
    }

    #[test]
    fn test_generate_spec_defaults() {
        let spec = GenerateSpec::classify("m", Duration::from_secs(1));
        assert!((spec.temperature - 0.3).abs() < f64::EPSILON);
        assert_eq!(spec.max_tokens, 500);

        let spec = GenerateSpec::reply("m", Duration::from_secs(1)).with_temperature(0.1);
        assert!((spec.temperature - 0.1).abs() < f64::EPSILON);
        assert_eq!(spec.max_tokens, 800);
    }
}
