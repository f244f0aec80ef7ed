// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control-plane writer entrypoint.

use anyhow::{Context, Result};
use relaycore_controlplane::{build_router, AppState, Config, TimeoutMonitor};
use relaycore_queue::SqsStepQueue;
use relaycore_state::{RunRepository, StepRepository, TaskRepository, TenantRepository};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaycore_controlplane=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading control-plane configuration")?;

    let pool = relaycore_state::connect(&config.database_url)
        .await
        .context("connecting to Postgres")?;
    relaycore_state::migrate(&pool).await.context("running schema migration")?;

    let queue: Arc<dyn relaycore_queue::StepQueue> = Arc::new(
        SqsStepQueue::from_env(config.queue_url.clone(), config.dlq_url.clone(), config.visibility_timeout_secs).await,
    );

    let monitor = TimeoutMonitor::new(
        RunRepository::new(pool.clone()),
        TaskRepository::new(pool.clone()),
        config.timeout_monitor_interval_secs,
        config.default_run_timeout_secs,
    );
    tokio::spawn(monitor.run());

    let state = Arc::new(AppState::new(
        TenantRepository::new(pool.clone()),
        TaskRepository::new(pool.clone()),
        RunRepository::new(pool.clone()),
        StepRepository::new(pool.clone()),
        queue,
    ));
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.context("binding control-plane listener")?;
    tracing::info!(%addr, "relaycore-controlplane listening");
    axum::serve(listener, app).await.context("control-plane server error")?;

    Ok(())
}
