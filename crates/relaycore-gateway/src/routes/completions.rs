// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `POST /v1/completions`: the gateway's one request-serving endpoint. Rate
//! check, token estimation, budget check, routing, then post-call
//! accounting, in that order — any step may short-circuit with an error
//! response.

use crate::error::GatewayError;
use crate::metrics;
use crate::router::RouteError;
use crate::SharedState;
use axum::extract::State;
use axum::Json;
use relaycore_core::domain::LlmEvent;
use relaycore_core::providers::{CompletionRequest, Message};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CompletionRequestBody {
    pub model: String,
    pub messages: Vec<Message>,
    pub tenant_id: Uuid,
    #[serde(default)]
    pub run_id: Option<Uuid>,
    #[serde(default)]
    pub step_id: Option<Uuid>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    /// Accepted for schema compatibility with OpenAI-style clients; no
    /// configured provider in this gateway executes function calls.
    #[serde(default)]
    pub functions: Option<serde_json::Value>,
    #[serde(default)]
    pub function_call: Option<serde_json::Value>,
    #[serde(default)]
    pub preferred_provider: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

#[derive(Debug, Serialize)]
pub struct CompletionUsageBody {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponseBody {
    pub id: Uuid,
    pub model: String,
    pub provider: String,
    pub content: String,
    pub finish_reason: String,
    pub usage: CompletionUsageBody,
    pub cost_usd: f64,
    pub latency_ms: i64,
    pub is_fallback: bool,
    pub attempted_providers: Vec<String>,
}

/// `ceil(1.3 * total word count)`: a pre-call guard the true post-call
/// token count replaces.
fn estimate_tokens(messages: &[Message]) -> i64 {
    let words: usize = messages.iter().map(|m| m.content.split_whitespace().count()).sum();
    (1.3 * words as f64).ceil() as i64
}

pub async fn completions(
    State(state): State<SharedState>,
    Json(body): Json<CompletionRequestBody>,
) -> Result<Json<CompletionResponseBody>, GatewayError> {
    state.record_request();

    let rate_status = state.rate_limiter.check_rate_limit(body.tenant_id).await;
    if !rate_status.allowed {
        metrics::COMPLETION_REQUESTS_TOTAL
            .with_label_values(&["none", "rate_limited"])
            .inc();
        return Err(GatewayError::RateLimited {
            tenant_id: body.tenant_id.to_string(),
            retry_after_secs: rate_status.reset_seconds,
        });
    }

    let estimated_tokens = estimate_tokens(&body.messages);
    let budget_status = state
        .budget
        .check_budget(body.tenant_id, estimated_tokens)
        .await?;
    state.record_budget_cache(budget_status.cache_hit);
    if !budget_status.allowed {
        metrics::BUDGET_REJECTIONS_TOTAL
            .with_label_values(&[&body.tenant_id.to_string()])
            .inc();
        return Err(GatewayError::BudgetExceeded {
            tenant_id: body.tenant_id.to_string(),
            remaining: budget_status.remaining,
        });
    }

    let request = CompletionRequest {
        model: body.model.clone(),
        messages: body.messages.clone(),
        max_tokens: body.max_tokens,
        temperature: body.temperature,
        top_p: body.top_p,
        frequency_penalty: body.frequency_penalty,
        presence_penalty: body.presence_penalty,
        stop: body.stop.clone(),
    };

    let started = std::time::Instant::now();
    let routed = state
        .router
        .route(request, body.preferred_provider.as_deref())
        .await
        .map_err(|e| match e {
            RouteError::ModelNotSupported(model) => GatewayError::ModelNotSupported { model },
            RouteError::AllProvidersFailed { model, attempted } => {
                metrics::COMPLETION_REQUESTS_TOTAL
                    .with_label_values(&["none", "all_providers_failed"])
                    .inc();
                GatewayError::AllProvidersFailed { model, attempted }
            }
            RouteError::RateLimited { provider } => {
                metrics::COMPLETION_REQUESTS_TOTAL
                    .with_label_values(&[&provider, "rate_limited"])
                    .inc();
                GatewayError::ProviderRateLimited { provider }
            }
        })?;
    let latency_ms = started.elapsed().as_millis() as i64;

    let cost_usd = state
        .router
        .calculate_cost(&routed.provider, &body.model, routed.response.usage);
    let prompt_tokens = routed.response.usage.prompt_tokens;
    let completion_tokens = routed.response.usage.completion_tokens;
    let total_tokens = routed.response.usage.total();

    metrics::COMPLETION_REQUESTS_TOTAL
        .with_label_values(&[&routed.provider, "success"])
        .inc();
    metrics::COMPLETION_LATENCY_SECONDS
        .with_label_values(&[&routed.provider])
        .observe(latency_ms as f64 / 1000.0);

    state.budget.increment_usage(body.tenant_id, total_tokens).await;

    let event_id = Uuid::new_v4();
    let event = LlmEvent {
        id: event_id,
        run_id: body.run_id.unwrap_or_else(Uuid::nil),
        step_id: body.step_id.unwrap_or_else(Uuid::nil),
        tenant_id: body.tenant_id,
        provider: routed.provider.clone(),
        model: body.model.clone(),
        prompt_tokens,
        completion_tokens,
        total_tokens,
        cost_usd,
        latency_ms,
        status: "success".to_string(),
        error_message: None,
        is_fallback: routed.is_fallback,
        attempted_providers: routed.attempted_providers.clone(),
        created_at: chrono::Utc::now(),
    };
    if let Err(e) = state.audit.store_llm_event(&event).await {
        tracing::warn!(error = %e, "failed to persist LLM event");
    }

    Ok(Json(CompletionResponseBody {
        id: event_id,
        model: body.model,
        provider: routed.provider,
        content: routed.response.content,
        finish_reason: routed.response.finish_reason,
        usage: CompletionUsageBody {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        },
        cost_usd,
        latency_ms,
        is_fallback: routed.is_fallback,
        attempted_providers: routed.attempted_providers,
    }))
}
