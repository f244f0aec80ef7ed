// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `GET /health` and `GET /metrics`.

use crate::SharedState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
struct ProviderHealth {
    provider: String,
    status: &'static str,
    circuit_breaker_state: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    providers: Vec<ProviderHealth>,
    cache_hit_rate: f64,
    requests_last_minute: usize,
}

pub async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let providers = state
        .router
        .health()
        .into_iter()
        .map(|(provider, breaker_state)| ProviderHealth {
            status: if breaker_state == "open" { "unavailable" } else { "available" },
            circuit_breaker_state: breaker_state,
            provider,
        })
        .collect();

    let response = HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        providers,
        cache_hit_rate: state.cache_hit_rate(),
        requests_last_minute: state.requests_last_minute(),
    };
    Json(serde_json::to_value(response).unwrap_or_default())
}

pub async fn metrics() -> String {
    crate::metrics::render()
}
