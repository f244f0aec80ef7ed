// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orchestrator worker entrypoint.

use anyhow::{Context, Result};
use relaycore_audit::DatabaseAuditStorage;
use relaycore_queue::SqsStepQueue;
use relaycore_state::{RunRepository, StepRepository, TaskRepository};
use relaycore_worker::{Config, GatewayClient, StepExecutor, ToolRegistry, Worker};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaycore_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading worker configuration")?;

    let pool = relaycore_state::connect(&config.database_url)
        .await
        .context("connecting to Postgres")?;
    relaycore_state::migrate(&pool).await.context("running schema migration")?;

    let queue = Arc::new(
        SqsStepQueue::from_env(
            config.queue_url.clone(),
            config.dlq_url.clone(),
            config.visibility_timeout_secs,
        )
        .await,
    );

    let audit = Arc::new(DatabaseAuditStorage::with_pool(pool.clone()));
    audit.migrate().await.context("running audit schema migration")?;

    let gateway = GatewayClient::new(config.gateway_url.clone());
    let tools = ToolRegistry::with_defaults(Duration::from_secs(config.http_tool_timeout_secs));
    let executor = StepExecutor::new(gateway, config.gateway_concurrency, tools);

    let worker = Arc::new(Worker::new(
        queue,
        RunRepository::new(pool.clone()),
        StepRepository::new(pool.clone()),
        TaskRepository::new(pool),
        audit,
        executor,
        config,
    ));

    tracing::info!("relaycore-worker starting");
    worker.run().await;
    Ok(())
}
