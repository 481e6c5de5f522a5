//! OpenAI-compatible chat completions provider.
//!
//! DeepSeek, OpenAI, and most hosted LLM APIs speak the same
//! `/v1/chat/completions` format; one implementation covers them all.

use super::{ChatRequest, ChatResponse, Message, Provider, ProviderError, ResponseFormat};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A provider that speaks the OpenAI-compatible chat completions API.
pub struct CompatibleProvider {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl CompatibleProvider {
    /// Create a new OpenAI-compatible provider with bearer auth.
    pub fn new(name: &str, base_url: &str, api_key: Option<&str>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .unwrap_or_else(|_| HeaderValue::from_static("")),
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Create a DeepSeek provider.
    pub fn deepseek(base_url: &str, api_key: Option<&str>) -> Self {
        Self::new("deepseek", base_url, api_key)
    }

    fn error(&self, model: &str, message: String, status_code: Option<u16>) -> ProviderError {
        ProviderError {
            provider: self.name.clone(),
            model: model.to_string(),
            message,
            status_code,
        }
    }
}

#[async_trait]
impl Provider for CompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut messages: Vec<Message> = request.messages.clone();
        if let Some(system) = &request.system {
            messages.insert(
                0,
                Message {
                    role: "system".into(),
                    content: system.clone(),
                },
            );
        }

        let body = CompatibleRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.response_format,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.error(&request.model, format!("Request failed: {e}"), None))?;

        let status = response.status();
        let latency_ms = start.elapsed().as_millis() as u64;

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(
                &request.model,
                format!("API error: {body}"),
                Some(status.as_u16()),
            ));
        }

        let parsed: CompatibleResponse = response.json().await.map_err(|e| {
            self.error(&request.model, format!("Failed to parse response: {e}"), None)
        })?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        let finish_reason = parsed.choices.first().and_then(|c| c.finish_reason.clone());

        tracing::debug!(
            provider = %self.name,
            model = %request.model,
            latency_ms,
            "Chat completion finished"
        );

        Ok(ChatResponse {
            provider: self.name.clone(),
            model: request.model,
            content,
            finish_reason,
            latency_ms,
        })
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct CompatibleRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct CompatibleResponse {
    choices: Vec<CompatibleChoice>,
}

#[derive(Debug, Deserialize)]
struct CompatibleChoice {
    message: CompatibleResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompatibleResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = CompatibleProvider::new("test", "https://api.example.com/", None);
        assert_eq!(provider.base_url, "https://api.example.com");
        assert_eq!(provider.name(), "test");
    }

    #[test]
    fn test_request_serialization_with_response_format() {
        let body = CompatibleRequest {
            model: "deepseek-chat".into(),
            messages: vec![Message {
                role: "user".into(),
                content: "你好".into(),
            }],
            temperature: Some(0.3),
            max_tokens: Some(500),
            response_format: Some(ResponseFormat::JsonObject),
        };

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("deepseek-chat"));
        assert!(json.contains(r#""response_format":{"type":"json_object"}"#));
    }

    #[test]
    fn test_request_serialization_omits_empty_options() {
        let body = CompatibleRequest {
            model: "deepseek-chat".into(),
            messages: vec![],
            temperature: None,
            max_tokens: None,
            response_format: None,
        };

        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("temperature"));
        assert!(!json.contains("response_format"));
    }

    #[test]
    fn test_response_deserialization() {
        let raw = r#"{
            "choices": [
                {"message": {"content": "{\"status\": \"normal\"}"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: CompatibleResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(
            parsed.choices[0].message.content,
            r#"{"status": "normal"}"#
        );
    }
}
