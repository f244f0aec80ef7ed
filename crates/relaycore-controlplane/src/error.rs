// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the Run-creation and status-transition surfaces.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("tenant not found: {0}")]
    TenantNotFound(uuid::Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(uuid::Uuid),

    #[error("run not found: {0}")]
    RunNotFound(uuid::Uuid),

    #[error("task {0} has no steps configured")]
    EmptyTaskConfig(uuid::Uuid),

    #[error("tenant budget exceeded: {requested} requested, {remaining} remaining")]
    BudgetExceeded { requested: i64, remaining: i64 },

    #[error("run {run_id} is in status {actual:?}, expected {expected:?}")]
    StatusConflict {
        run_id: uuid::Uuid,
        expected: String,
        actual: String,
    },

    #[error("database error: {0}")]
    Database(#[from] relaycore_state::StateError),

    #[error("queue error: {0}")]
    Queue(#[from] relaycore_queue::QueueError),

    #[error("malformed step spec: {0}")]
    InvalidStepSpec(String),
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;

impl IntoResponse for ControlPlaneError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControlPlaneError::TenantNotFound(_)
            | ControlPlaneError::TaskNotFound(_)
            | ControlPlaneError::RunNotFound(_) => StatusCode::NOT_FOUND,
            ControlPlaneError::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
            ControlPlaneError::StatusConflict { .. } => StatusCode::CONFLICT,
            ControlPlaneError::EmptyTaskConfig(_) | ControlPlaneError::InvalidStepSpec(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ControlPlaneError::Database(relaycore_state::StateError::TransitionConflict { .. }) => {
                StatusCode::CONFLICT
            }
            ControlPlaneError::Database(_) | ControlPlaneError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
