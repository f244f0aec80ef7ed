// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anthropic (Claude) provider implementation.

use async_trait::async_trait;
use relaycore_core::pricing::PricingTable;
use relaycore_core::providers::{
    CompletionRequest, CompletionResponse, LlmProvider, ProviderError, Role, TokenUsage,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const SUPPORTED_MODELS: &[&str] = &[
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

/// Anthropic API provider.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    api_version: String,
    pricing: Arc<PricingTable>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[allow(dead_code)]
    id: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: i64,
    output_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl AnthropicProvider {
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
        Self::with_base_url(
            api_key,
            "https://api.anthropic.com/v1".to_string(),
            "2023-06-01".to_string(),
            pricing,
        )
    }

    pub fn with_base_url(
        api_key: String,
        base_url: String,
        api_version: String,
        pricing: Arc<PricingTable>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url,
            api_version,
            pricing,
        }
    }

    /// Anthropic's wire format pulls the system prompt out of the message
    /// list into its own top-level field.
    fn to_anthropic_request(&self, request: &CompletionRequest) -> MessagesRequest {
        let mut system = None;
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            match message.role {
                Role::System => system = Some(message.content.clone()),
                Role::User => messages.push(Message {
                    role: "user".to_string(),
                    content: message.content.clone(),
                }),
                Role::Assistant => messages.push(Message {
                    role: "assistant".to_string(),
                    content: message.content.clone(),
                }),
            }
        }

        MessagesRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(1024),
            system,
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop.clone(),
        }
    }

    fn parse_error(&self, status: StatusCode, body: &str) -> ProviderError {
        if let Ok(error_response) = serde_json::from_str::<AnthropicErrorResponse>(body) {
            let error = error_response.error;

            if status == StatusCode::TOO_MANY_REQUESTS || error.error_type == "rate_limit_error" {
                return ProviderError::RateLimitExceeded;
            }

            if status == StatusCode::UNAUTHORIZED
                || status == StatusCode::FORBIDDEN
                || error.error_type == "authentication_error"
                || error.error_type == "permission_error"
            {
                return ProviderError::AuthError(error.message);
            }

            if error.error_type == "invalid_request_error" {
                return ProviderError::InvalidRequest(error.message);
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
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let anthropic_request = self.to_anthropic_request(request);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("Content-Type", "application/json")
            .json(&anthropic_request)
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

        let messages_response: MessagesResponse = serde_json::from_str(&body)?;

        let text = messages_response
            .content
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content: text,
            finish_reason: messages_response
                .stop_reason
                .unwrap_or_else(|| "end_turn".to_string()),
            usage: TokenUsage {
                prompt_tokens: messages_response.usage.input_tokens,
                completion_tokens: messages_response.usage.output_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore_core::pricing::ModelPricing;
    use relaycore_core::providers::Message as CoreMessage;

    fn pricing() -> Arc<PricingTable> {
        let mut table = PricingTable::default();
        table.insert(
            "claude-3-opus-20240229",
            ModelPricing {
                prompt_per_1k: 0.015,
                completion_per_1k: 0.075,
            },
        );
        Arc::new(table)
    }

    #[test]
    fn splits_system_prompt_from_messages() {
        let provider =
            AnthropicProvider::new("test-key".to_string(), pricing());

        let request = CompletionRequest {
            model: "claude-3-opus-20240229".to_string(),
            messages: vec![
                CoreMessage::system("You are a helpful assistant"),
                CoreMessage::user("Hello, world!"),
            ],
            max_tokens: Some(100),
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: None,
        };

        let anthropic_req = provider.to_anthropic_request(&request);

        assert_eq!(anthropic_req.model, "claude-3-opus-20240229");
        assert_eq!(anthropic_req.messages.len(), 1);
        assert_eq!(anthropic_req.messages[0].role, "user");
        assert_eq!(
            anthropic_req.system,
            Some("You are a helpful assistant".to_string())
        );
        assert_eq!(anthropic_req.max_tokens, 100);
    }

    #[test]
    fn parses_rate_limit_error() {
        let provider = AnthropicProvider::new("test-key".to_string(), pricing());
        let body = r#"{"error":{"type":"rate_limit_error","message":"Rate limit exceeded"}}"#;
        let error = provider.parse_error(StatusCode::TOO_MANY_REQUESTS, body);
        assert!(matches!(error, ProviderError::RateLimitExceeded));
    }

    #[test]
    fn parses_auth_error() {
        let provider = AnthropicProvider::new("test-key".to_string(), pricing());
        let body = r#"{"error":{"type":"authentication_error","message":"Invalid API key"}}"#;
        let error = provider.parse_error(StatusCode::UNAUTHORIZED, body);
        match error {
            ProviderError::AuthError(msg) => assert_eq!(msg, "Invalid API key"),
            _ => panic!("expected AuthError"),
        }
    }

    #[test]
    fn parses_invalid_request_error() {
        let provider = AnthropicProvider::new("test-key".to_string(), pricing());
        let body = r#"{"error":{"type":"invalid_request_error","message":"Missing required field"}}"#;
        let error = provider.parse_error(StatusCode::BAD_REQUEST, body);
        match error {
            ProviderError::InvalidRequest(msg) => assert_eq!(msg, "Missing required field"),
            _ => panic!("expected InvalidRequest"),
        }
    }

    fn sample_request() -> CompletionRequest {
        CompletionRequest {
            model: "claude-3-opus-20240229".to_string(),
            messages: vec![CoreMessage::user("hi")],
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
            .mock("POST", "/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"msg_1","content":[{"type":"text","text":"hi there"}],"stop_reason":"end_turn","usage":{"input_tokens":3,"output_tokens":2}}"#,
            )
            .create_async()
            .await;

        let provider = AnthropicProvider::with_base_url(
            "test-key".to_string(),
            server.url(),
            "2023-06-01".to_string(),
            pricing(),
        );
        let response = provider.complete(&sample_request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "hi there");
        assert_eq!(response.finish_reason, "end_turn");
        assert_eq!(response.usage.prompt_tokens, 3);
        assert_eq!(response.usage.completion_tokens, 2);
    }

    #[tokio::test]
    async fn complete_maps_a_429_to_rate_limit_exceeded() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/messages")
            .with_status(429)
            .with_body(r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#)
            .create_async()
            .await;

        let provider = AnthropicProvider::with_base_url(
            "test-key".to_string(),
            server.url(),
            "2023-06-01".to_string(),
            pricing(),
        );
        let err = provider.complete(&sample_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimitExceeded));
    }
}
