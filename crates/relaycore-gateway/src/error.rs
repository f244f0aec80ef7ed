//! Error types returned to HTTP clients of the gateway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relaycore_core::providers::ProviderError;

fn with_retry_after(response: Response, retry_after_secs: u64) -> Response {
    let mut response = response;
    if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
    }
    response
}

#[derive(Debug)]
pub enum GatewayError {
    ModelNotSupported { model: String },
    AllProvidersFailed { model: String, attempted: Vec<String> },
    CircuitOpen { provider: String },
    BudgetExceeded { tenant_id: String, remaining: i64 },
    RateLimited { tenant_id: String, retry_after_secs: u64 },
    ProviderRateLimited { provider: String },
    TenantNotFound { tenant_id: String },
    Upstream(ProviderError),
    Internal(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::ModelNotSupported { model } => (
                StatusCode::BAD_REQUEST,
                "model_not_supported",
                format!("no configured provider supports model '{model}'"),
            ),
            GatewayError::AllProvidersFailed { model, attempted } => (
                StatusCode::BAD_GATEWAY,
                "all_providers_failed",
                format!(
                    "all providers failed for model '{model}'. attempted: {}",
                    attempted.join(", ")
                ),
            ),
            GatewayError::CircuitOpen { provider } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "circuit_open",
                format!("provider '{provider}' is temporarily unavailable"),
            ),
            GatewayError::BudgetExceeded {
                tenant_id,
                remaining,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "budget_exceeded",
                format!("tenant {tenant_id} has {remaining} tokens remaining this month"),
            ),
            GatewayError::RateLimited {
                tenant_id,
                retry_after_secs,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!("tenant {tenant_id} exceeded its request rate, retry in {retry_after_secs}s"),
            ),
            GatewayError::ProviderRateLimited { provider } => (
                StatusCode::TOO_MANY_REQUESTS,
                "provider_rate_limited",
                format!("provider '{provider}' rate limited the request"),
            ),
            GatewayError::TenantNotFound { tenant_id } => (
                StatusCode::NOT_FOUND,
                "tenant_not_found",
                format!("tenant {tenant_id} not found"),
            ),
            GatewayError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                e.to_string(),
            ),
            GatewayError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone()),
        };

        let body = (
            status,
            Json(serde_json::json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            })),
        )
            .into_response();

        match self {
            GatewayError::RateLimited { retry_after_secs, .. } => with_retry_after(body, retry_after_secs),
            GatewayError::ProviderRateLimited { .. } => with_retry_after(body, 1),
            _ => body,
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(e: ProviderError) -> Self {
        GatewayError::Upstream(e)
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
