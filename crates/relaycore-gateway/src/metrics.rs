//! Prometheus metrics exposed at `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    pub static ref COMPLETION_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "relaycore_gateway_completion_requests_total",
        "Completion requests handled, by provider and outcome",
        &["provider", "outcome"]
    )
    .unwrap();
    pub static ref COMPLETION_LATENCY_SECONDS: HistogramVec = register_histogram_vec!(
        "relaycore_gateway_completion_latency_seconds",
        "Completion request latency in seconds, by provider",
        &["provider"]
    )
    .unwrap();
    pub static ref BUDGET_REJECTIONS_TOTAL: CounterVec = register_counter_vec!(
        "relaycore_gateway_budget_rejections_total",
        "Requests rejected for exceeding a tenant's token budget",
        &["tenant_id"]
    )
    .unwrap();
    pub static ref RATE_LIMIT_REJECTIONS_TOTAL: CounterVec = register_counter_vec!(
        "relaycore_gateway_rate_limit_rejections_total",
        "Requests rejected for exceeding a tenant's rate limit",
        &["tenant_id"]
    )
    .unwrap();
}

pub fn render() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
