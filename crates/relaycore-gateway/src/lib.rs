// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider-abstracting LLM gateway: one stateless Axum service fronting N
//! providers behind a single `POST /v1/completions`, with per-provider
//! circuit breakers, deterministic failover, and Redis-backed budget/rate
//! enforcement shared across replicas.

pub mod budget;
pub mod config;
pub mod error;
pub mod metrics;
pub mod reconcile;
pub mod router;
pub mod routes;

pub use config::Config;
pub use error::GatewayError;

use crate::budget::{BudgetEnforcer, RateLimiter};
use crate::router::ProviderRouter;
use relaycore_audit::storage::AuditStorageRef;
use relaycore_core::pricing::PricingTable;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Shared state behind every route. Built once at startup and cloned (as an
/// `Arc`) into each request.
pub struct AppState {
    pub router: ProviderRouter,
    pub budget: BudgetEnforcer,
    pub rate_limiter: RateLimiter,
    pub pricing: std::sync::Arc<PricingTable>,
    pub audit: AuditStorageRef,
    pub config: Config,

    /// Timestamps of completions accepted in roughly the last minute, for
    /// the `requests_last_minute` health field. Pruned lazily on read.
    recent_requests: Mutex<VecDeque<Instant>>,
    /// `(hits, total)` budget cache lookups, for the `cache_hit_rate` health
    /// field.
    budget_cache: Mutex<(u64, u64)>,
}

impl AppState {
    pub fn new(
        router: ProviderRouter,
        budget: BudgetEnforcer,
        rate_limiter: RateLimiter,
        pricing: std::sync::Arc<PricingTable>,
        audit: AuditStorageRef,
        config: Config,
    ) -> Self {
        Self {
            router,
            budget,
            rate_limiter,
            pricing,
            audit,
            config,
            recent_requests: Mutex::new(VecDeque::new()),
            budget_cache: Mutex::new((0, 0)),
        }
    }

    fn record_request(&self) {
        let mut recent = self.recent_requests.lock().unwrap();
        let now = Instant::now();
        recent.push_back(now);
        while let Some(front) = recent.front() {
            if now.duration_since(*front) > std::time::Duration::from_secs(60) {
                recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn requests_last_minute(&self) -> usize {
        let mut recent = self.recent_requests.lock().unwrap();
        let now = Instant::now();
        while let Some(front) = recent.front() {
            if now.duration_since(*front) > std::time::Duration::from_secs(60) {
                recent.pop_front();
            } else {
                break;
            }
        }
        recent.len()
    }

    fn record_budget_cache(&self, hit: bool) {
        let mut counters = self.budget_cache.lock().unwrap();
        counters.1 += 1;
        if hit {
            counters.0 += 1;
        }
    }

    fn cache_hit_rate(&self) -> f64 {
        let counters = self.budget_cache.lock().unwrap();
        if counters.1 == 0 {
            return 1.0;
        }
        counters.0 as f64 / counters.1 as f64
    }
}

pub type SharedState = std::sync::Arc<AppState>;

pub fn build_router(state: SharedState) -> axum::Router {
    axum::Router::new()
        .route("/v1/completions", axum::routing::post(routes::completions::completions))
        .route("/health", axum::routing::get(routes::health::health))
        .route("/metrics", axum::routing::get(routes::health::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
