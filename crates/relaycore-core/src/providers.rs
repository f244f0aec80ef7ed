// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The provider capability trait. Every backend (OpenAI, Anthropic, a local
//! stub) implements this the same way regardless of its wire format; the
//! gateway's router never branches on provider identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A provider-agnostic completion request. The worker builds exactly one of
/// these per `llm` step; the gateway hands it to whichever provider the
/// router selects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

impl TokenUsage {
    pub fn total(&self) -> i64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub finish_reason: String,
    pub usage: TokenUsage,
}

/// Provider error.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("model {0} is not supported by this provider")]
    UnsupportedModel(String),

    #[error("Provider error: {0}")]
    ProviderSpecific(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl ProviderError {
    /// Whether the router should fail over to the next provider rather than
    /// surface this to the caller immediately. A rate limit is a signal from
    /// the provider to back off, not a fault another provider can route
    /// around, so it is deliberately excluded here; the router returns it to
    /// the caller unchanged instead of trying the next candidate.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::HttpError(_) | ProviderError::Timeout | ProviderError::Unknown(_)
        )
    }
}

/// The capability surface every LLM backend exposes to the gateway's router.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn supports_model(&self, model: &str) -> bool;

    /// Translates a gateway-facing model alias into the name the upstream
    /// API expects, if this provider knows one.
    fn map_model_name(&self, model: &str) -> Option<String>;

    fn calculate_cost(&self, model: &str, usage: TokenUsage) -> f64;

    async fn is_available(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_totals() {
        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        };
        assert_eq!(usage.total(), 15);
    }

    #[test]
    fn retryable_errors() {
        assert!(ProviderError::Timeout.is_retryable());
        assert!(!ProviderError::RateLimitExceeded.is_retryable());
        assert!(!ProviderError::AuthError("x".into()).is_retryable());
        assert!(!ProviderError::UnsupportedModel("x".into()).is_retryable());
    }
}
