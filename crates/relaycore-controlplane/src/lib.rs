// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control-plane writer: the only component with authority to create Runs,
//! enforcing the tenant budget gate at creation time, and the background
//! monitor that reaps Runs a wedged worker never finishes.

pub mod config;
pub mod error;
pub mod routes;
pub mod timeout_monitor;

pub use config::Config;
pub use error::{ControlPlaneError, Result};
pub use timeout_monitor::TimeoutMonitor;

use axum::routing::post;
use axum::Router;
use relaycore_state::{RunRepository, StepRepository, TaskRepository, TenantRepository};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub tenants: TenantRepository,
    pub tasks: TaskRepository,
    pub runs: RunRepository,
    pub steps: StepRepository,
    pub queue: Arc<dyn relaycore_queue::StepQueue>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        tenants: TenantRepository,
        tasks: TaskRepository,
        runs: RunRepository,
        steps: StepRepository,
        queue: Arc<dyn relaycore_queue::StepQueue>,
    ) -> Self {
        Self {
            tenants,
            tasks,
            runs,
            steps,
            queue,
        }
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/internal/runs", post(routes::runs::create_run))
        .route("/internal/runs/:run_id/status", post(routes::runs::update_run_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
