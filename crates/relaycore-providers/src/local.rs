// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A dependency-free provider for local development and integration tests.
//! Echoes the last user message back with a fixed prefix instead of calling
//! an upstream API.

use async_trait::async_trait;
use relaycore_core::providers::{
    CompletionRequest, CompletionResponse, LlmProvider, ProviderError, Role, TokenUsage,
};

pub struct LocalProvider {
    model_prefix: String,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self {
            model_prefix: "local-".to_string(),
        }
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn supports_model(&self, model: &str) -> bool {
        model.starts_with(&self.model_prefix)
    }

    fn map_model_name(&self, model: &str) -> Option<String> {
        self.supports_model(model).then(|| model.to_string())
    }

    fn calculate_cost(&self, _model: &str, _usage: TokenUsage) -> f64 {
        0.0
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .ok_or_else(|| ProviderError::InvalidRequest("no user message".to_string()))?;

        let content = format!("echo: {}", last_user.content);
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as i64)
            .sum();
        let completion_tokens = content.split_whitespace().count() as i64;

        Ok(CompletionResponse {
            content,
            finish_reason: "stop".to_string(),
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore_core::providers::Message;

    #[tokio::test]
    async fn echoes_last_user_message() {
        let provider = LocalProvider::new();
        let request = CompletionRequest {
            model: "local-echo".to_string(),
            messages: vec![Message::system("ignored"), Message::user("ping")],
            max_tokens: None,
            temperature: 0.0,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: None,
        };

        let response = provider.complete(&request).await.unwrap();
        assert_eq!(response.content, "echo: ping");
    }

    #[test]
    fn is_free() {
        let provider = LocalProvider::new();
        assert_eq!(
            provider.calculate_cost(
                "local-echo",
                TokenUsage {
                    prompt_tokens: 1000,
                    completion_tokens: 1000
                }
            ),
            0.0
        );
    }
}
