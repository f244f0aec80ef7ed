// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LLM gateway entrypoint.

use anyhow::{Context, Result};
use relaycore_audit::{AuditRetentionManager, DatabaseAuditStorage};
use relaycore_core::pricing::{ModelPricing, PricingTable};
use relaycore_gateway::budget::{BudgetEnforcer, RateLimiter};
use relaycore_gateway::reconcile::Reconciler;
use relaycore_gateway::router::ProviderRouter;
use relaycore_gateway::{build_router, AppState, Config};
use relaycore_providers::{AnthropicProvider, LocalProvider, OpenAiProvider};
use relaycore_state::TenantRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn default_pricing() -> PricingTable {
    let mut table = PricingTable::default();
    table.insert("gpt-4", ModelPricing { prompt_per_1k: 0.03, completion_per_1k: 0.06 });
    table.insert("gpt-3.5-turbo", ModelPricing { prompt_per_1k: 0.0005, completion_per_1k: 0.0015 });
    table.insert("claude-3-opus", ModelPricing { prompt_per_1k: 0.015, completion_per_1k: 0.075 });
    table.insert("claude-3-sonnet", ModelPricing { prompt_per_1k: 0.003, completion_per_1k: 0.015 });
    table
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaycore_gateway=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading gateway configuration")?;

    let pool = relaycore_state::connect(&config.database_url)
        .await
        .context("connecting to Postgres")?;
    relaycore_state::migrate(&pool).await.context("running schema migration")?;

    let redis_client = redis::Client::open(config.redis_url.clone()).context("invalid REDIS_URL")?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("connecting to Redis")?;

    let pricing = Arc::new(default_pricing());

    let mut providers: Vec<Arc<dyn relaycore_core::providers::LlmProvider>> = Vec::new();
    if let Some(key) = config.openai_api_key.clone() {
        providers.push(Arc::new(OpenAiProvider::new(key, pricing.clone())));
    }
    if let Some(key) = config.anthropic_api_key.clone() {
        providers.push(Arc::new(AnthropicProvider::new(key, pricing.clone())));
    }
    if config.local_provider_enabled {
        providers.push(Arc::new(LocalProvider::new()));
    }
    if providers.is_empty() {
        tracing::warn!("no LLM provider configured, enabling the local stub so the gateway is usable");
        providers.push(Arc::new(LocalProvider::new()));
    }

    let router = ProviderRouter::new(
        providers,
        config.provider_priority.clone(),
        config.circuit_breaker_enabled,
        config.circuit_breaker_failure_threshold,
        Duration::from_secs(config.circuit_breaker_timeout_secs),
    );

    let budget = BudgetEnforcer::new(
        redis_conn.clone(),
        TenantRepository::new(pool.clone()),
        config.budget_soft_limit_percent,
        config.budget_check_enabled,
    );
    let rate_limiter = RateLimiter::new(
        redis_conn.clone(),
        TenantRepository::new(pool.clone()),
        config.rate_limit_requests_per_minute,
        config.rate_limit_window_secs,
        config.rate_limit_enabled,
    );

    let audit = Arc::new(DatabaseAuditStorage::with_pool(pool.clone()));
    audit.migrate().await.context("running audit schema migration")?;

    let retention = Arc::new(AuditRetentionManager::new(audit.clone(), config.audit_retention_days));
    retention.start_background_cleanup(Duration::from_secs(config.audit_cleanup_interval_secs));

    let reconciler = Reconciler::new(
        redis_conn.clone(),
        TenantRepository::new(pool.clone()),
        config.usage_reconcile_interval_secs,
    );
    tokio::spawn(reconciler.run());

    let state: Arc<AppState> = Arc::new(AppState::new(router, budget, rate_limiter, pricing, audit, config.clone()));
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.context("binding gateway listener")?;
    tracing::info!(%addr, "relaycore-gateway listening");
    axum::serve(listener, app).await.context("gateway server error")?;

    Ok(())
}
