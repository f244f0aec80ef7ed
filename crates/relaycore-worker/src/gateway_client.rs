// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the LLM step dispatch boundary: `POST /v1/completions`
//! on the gateway. Each concurrent step execution holds its own reference
//! to a single shared [`reqwest::Client`] (connection pooling is the
//! client's, not ours).

use crate::error::WorkerError;
use relaycore_core::providers::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequestBody {
    model: String,
    messages: Vec<Message>,
    tenant_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step_id: Option<Uuid>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayCompletionResponse {
    #[allow(dead_code)]
    pub id: String,
    pub provider: String,
    pub content: String,
    #[allow(dead_code)]
    pub finish_reason: String,
    pub usage: CompletionUsage,
    pub cost_usd: f64,
    #[allow(dead_code)]
    pub latency_ms: i64,
    pub is_fallback: bool,
    pub attempted_providers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: GatewayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorDetail {
    code: String,
    message: String,
}

pub struct CompletionCall {
    pub model: String,
    pub messages: Vec<Message>,
    pub tenant_id: Uuid,
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl GatewayClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("failed to build gateway HTTP client");
        Self { client, base_url }
    }

    pub async fn complete(&self, call: CompletionCall) -> Result<GatewayCompletionResponse, WorkerError> {
        let body = CompletionRequestBody {
            model: call.model,
            messages: call.messages,
            tenant_id: call.tenant_id,
            run_id: Some(call.run_id),
            step_id: Some(call.step_id),
            temperature: call.temperature,
            max_tokens: call.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/v1/completions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkerError::GatewayTransport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<GatewayCompletionResponse>()
                .await
                .map_err(|e| WorkerError::GatewayTransport(format!("malformed gateway response: {e}")));
        }

        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        let error_body = response.json::<GatewayErrorBody>().await.ok();

        match status.as_u16() {
            400 => Err(WorkerError::ModelNotSupported(
                error_body.map(|b| b.error.message).unwrap_or_else(|| "model not supported".to_string()),
            )),
            402 => Err(WorkerError::BudgetExceeded {
                remaining: 0,
            }),
            429 => Err(WorkerError::RateLimited { retry_after_secs }),
            503 => Err(WorkerError::AllProvidersFailed(
                error_body
                    .map(|b| vec![b.error.code])
                    .unwrap_or_default(),
            )),
            _ => Err(WorkerError::GatewayTransport(format!(
                "gateway returned {status}: {}",
                error_body.map(|b| b.error.message).unwrap_or_default()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> CompletionCall {
        CompletionCall {
            model: "gpt-4".to_string(),
            messages: vec![Message::user("hi")],
            tenant_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            temperature: 0.7,
            max_tokens: Some(100),
        }
    }

    #[tokio::test]
    async fn complete_parses_a_successful_gateway_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"1","provider":"openai","content":"hi there","finish_reason":"stop",
                "usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5},"cost_usd":0.001,
                "latency_ms":10,"is_fallback":false,"attempted_providers":["openai"]}"#,
            )
            .create_async()
            .await;

        let client = GatewayClient::new(server.url());
        let response = client.complete(call()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.provider, "openai");
        assert_eq!(response.content, "hi there");
        assert_eq!(response.usage.total_tokens, 5);
    }

    #[tokio::test]
    async fn complete_maps_a_429_to_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/completions")
            .with_status(429)
            .with_header("retry-after", "5")
            .with_body(r#"{"error":{"code":"rate_limited","message":"slow down"}}"#)
            .create_async()
            .await;

        let client = GatewayClient::new(server.url());
        let err = client.complete(call()).await.unwrap_err();
        match err {
            WorkerError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 5),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_maps_a_402_to_budget_exceeded() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/completions")
            .with_status(402)
            .with_body(r#"{"error":{"code":"budget_exceeded","message":"no tokens left"}}"#)
            .create_async()
            .await;

        let client = GatewayClient::new(server.url());
        let err = client.complete(call()).await.unwrap_err();
        assert!(matches!(err, WorkerError::BudgetExceeded { .. }));
    }
}
