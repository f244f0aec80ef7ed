// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI provider implementation.

use async_trait::async_trait;
use relaycore_core::pricing::PricingTable;
use relaycore_core::providers::{
    CompletionRequest, CompletionResponse, LlmProvider, ProviderError, Role, TokenUsage,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const SUPPORTED_MODELS: &[&str] = &["gpt-4", "gpt-4-turbo", "gpt-4o", "gpt-3.5-turbo"];

/// OpenAI API provider.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    pricing: Arc<PricingTable>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[allow(dead_code)]
    id: String,
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

impl OpenAiProvider {
    fn convert_reqwest_error(err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = err.status() {
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                ProviderError::AuthError(err.to_string())
            } else if status == StatusCode::TOO_MANY_REQUESTS {
                ProviderError::RateLimitExceeded
            } else {
                ProviderError::HttpError(err.to_string())
            }
        } else {
            ProviderError::HttpError(err.to_string())
        }
    }

    pub fn new(api_key: String, pricing: Arc<PricingTable>) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com/v1".to_string(), pricing)
    }

    pub fn with_base_url(api_key: String, base_url: String, pricing: Arc<PricingTable>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url,
            pricing,
        }
    }

    fn to_openai_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        let messages = request
            .messages
            .iter()
            .map(|m| ChatMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect();

        ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: Some(request.temperature),
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
            stop: request.stop.clone(),
            stream: false,
        }
    }

    fn parse_error(&self, status: StatusCode, body: &str) -> ProviderError {
        if let Ok(error_response) = serde_json::from_str::<OpenAiErrorResponse>(body) {
            let error = error_response.error;
            if status == StatusCode::TOO_MANY_REQUESTS || error.error_type == "rate_limit_exceeded"
            {
                return ProviderError::RateLimitExceeded;
            }
            if status == StatusCode::UNAUTHORIZED || error.error_type == "invalid_api_key" {
                return ProviderError::AuthError(error.message);
            }
            return ProviderError::ProviderSpecific(format!(
                "[{}] {}: {}",
                status.as_u16(),
                error.error_type,
                error.message
            ));
        }
        ProviderError::HttpError(format!("[{}] {}", status.as_u16(), body))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn supports_model(&self, model: &str) -> bool {
        SUPPORTED_MODELS.iter().any(|m| *m == model)
    }

    fn map_model_name(&self, model: &str) -> Option<String> {
        self.supports_model(model).then(|| model.to_string())
    }

    fn calculate_cost(&self, model: &str, usage: TokenUsage) -> f64 {
        self.pricing
            .cost(model, usage.prompt_tokens, usage.completion_tokens)
    }

    async fn is_available(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await;
        matches!(response, Ok(r) if r.status().is_success())
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let openai_request = self.to_openai_request(request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&openai_request)
            .send()
            .await
            .map_err(Self::convert_reqwest_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read response body".to_string());

        if !status.is_success() {
            return Err(self.parse_error(status, &body));
        }

        let completion: ChatCompletionResponse = serde_json::from_str(&body)?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::SerializationError("no choices in response".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage: TokenUsage {
                prompt_tokens: completion.usage.prompt_tokens,
                completion_tokens: completion.usage.completion_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore_core::pricing::ModelPricing;
    use relaycore_core::providers::Message;

    fn pricing() -> Arc<PricingTable> {
        let mut table = PricingTable::default();
        table.insert(
            "gpt-4",
            ModelPricing {
                prompt_per_1k: 0.03,
                completion_per_1k: 0.06,
            },
        );
        Arc::new(table)
    }

    #[test]
    fn reports_supported_models() {
        let provider = OpenAiProvider::new("test-key".to_string(), pricing());
        assert!(provider.supports_model("gpt-4"));
        assert!(!provider.supports_model("claude-3-opus"));
    }

    #[test]
    fn builds_message_list_in_order() {
        let provider = OpenAiProvider::new("test-key".to_string(), pricing());
        let request = CompletionRequest {
            model: "gpt-4".to_string(),
            messages: vec![Message::system("be terse"), Message::user("hi")],
            max_tokens: Some(100),
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: None,
        };
        let openai_req = provider.to_openai_request(&request);
        assert_eq!(openai_req.messages.len(), 2);
        assert_eq!(openai_req.messages[0].role, "system");
        assert_eq!(openai_req.messages[1].role, "user");
    }

    #[test]
    fn parses_rate_limit_error() {
        let provider = OpenAiProvider::new("test-key".to_string(), pricing());
        let body = r#"{"error":{"message":"Rate limit exceeded","type":"rate_limit_exceeded"}}"#;
        let error = provider.parse_error(StatusCode::TOO_MANY_REQUESTS, body);
        assert!(matches!(error, ProviderError::RateLimitExceeded));
    }

    #[test]
    fn parses_auth_error() {
        let provider = OpenAiProvider::new("test-key".to_string(), pricing());
        let body = r#"{"error":{"message":"Invalid API key","type":"invalid_api_key"}}"#;
        let error = provider.parse_error(StatusCode::UNAUTHORIZED, body);
        match error {
            ProviderError::AuthError(msg) => assert_eq!(msg, "Invalid API key"),
            _ => panic!("expected AuthError"),
        }
    }

    fn sample_request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4".to_string(),
            messages: vec![Message::user("hi")],
            max_tokens: Some(100),
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: None,
        }
    }

    #[tokio::test]
    async fn complete_parses_a_successful_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"chatcmpl-1","choices":[{"message":{"role":"assistant","content":"hi there"},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":2}}"#,
            )
            .create_async()
            .await;

        let provider = OpenAiProvider::with_base_url("test-key".to_string(), server.url(), pricing());
        let response = provider.complete(&sample_request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "hi there");
        assert_eq!(response.finish_reason, "stop");
        assert_eq!(response.usage.prompt_tokens, 3);
        assert_eq!(response.usage.completion_tokens, 2);
    }

    #[tokio::test]
    async fn complete_maps_a_429_to_rate_limit_exceeded() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"slow down","type":"rate_limit_exceeded"}}"#)
            .create_async()
            .await;

        let provider = OpenAiProvider::with_base_url("test-key".to_string(), server.url(), pricing());
        let err = provider.complete(&sample_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimitExceeded));
    }
}
