// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `POST /internal/runs` and `POST /internal/runs/{run_id}/status`.
//!
//! Run creation is the one place the platform enforces the monthly budget
//! gate up front, before a single token is spent: validate, insert as
//! `pending`, enqueue the first step, return. A Run that fails to enqueue
//! after being inserted is left `pending` for the timeout monitor to sweep
//! rather than rolled back, since the insert and the enqueue cannot be made
//! transactional across Postgres and SQS.

use crate::error::{ControlPlaneError, Result};
use crate::SharedState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use relaycore_core::domain::{Run, RunStatus, Step, StepStatus};
use relaycore_queue::StepMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub task_id: Uuid,
    pub tenant_id: Uuid,
    pub created_by: Uuid,
    pub token_budget: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateRunResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
}

pub async fn create_run(
    State(state): State<SharedState>,
    Json(body): Json<CreateRunRequest>,
) -> Result<Json<CreateRunResponse>> {
    let tenant = state.tenants.get(body.tenant_id).await?;
    let task = state.tasks.get(body.task_id).await?;

    let requested_budget = body.token_budget.unwrap_or(task.default_token_budget);
    let remaining = tenant.token_budget_monthly - tenant.token_used_current_month;
    if requested_budget > remaining {
        return Err(ControlPlaneError::BudgetExceeded {
            requested: requested_budget,
            remaining,
        });
    }

    let first_step = task
        .task_config
        .first()
        .ok_or(ControlPlaneError::EmptyTaskConfig(task.id))?;

    let run = Run {
        id: Uuid::new_v4(),
        task_id: task.id,
        tenant_id: tenant.id,
        created_by: body.created_by,
        status: RunStatus::Pending,
        token_budget: requested_budget,
        tokens_used: 0,
        estimated_cost_usd: 0.0,
        started_at: None,
        completed_at: None,
        duration_seconds: None,
        current_step: None,
        error_message: None,
    };
    state.runs.create(&run).await?;

    let step = Step {
        id: Uuid::new_v4(),
        run_id: run.id,
        step_name: first_step.name().to_string(),
        step_type: first_step.step_type(),
        step_order: 0,
        status: StepStatus::Queued,
        attempt_number: 0,
        max_attempts: task.max_retries + 1,
        input_data: serde_json::to_value(first_step).unwrap_or(serde_json::Value::Null),
        output_data: None,
        error_message: None,
        tokens_used: 0,
        cost_usd: 0.0,
        started_at: None,
        completed_at: None,
    };
    state.steps.create(&step).await?;

    let message = StepMessage::for_spec(run.id, step.id, first_step)
        .map_err(|e| ControlPlaneError::InvalidStepSpec(e.to_string()))?;
    state.queue.send(&message).await?;

    state
        .runs
        .transition_status(run.id, RunStatus::Pending, RunStatus::Running)
        .await?;
    state.runs.mark_started(run.id).await?;
    state.runs.set_current_step(run.id, &step.step_name).await?;

    tracing::info!(run_id = %run.id, task_id = %task.id, tenant_id = %tenant.id, "run created");

    Ok(Json(CreateRunResponse {
        run_id: run.id,
        status: RunStatus::Running,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRunStatusRequest {
    pub expected_status: RunStatus,
    pub new_status: RunStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateRunStatusResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
}

pub async fn update_run_status(
    State(state): State<SharedState>,
    Path(run_id): Path<Uuid>,
    Json(body): Json<UpdateRunStatusRequest>,
) -> Result<Json<UpdateRunStatusResponse>> {
    let current = state.runs.get(run_id).await?;
    if current.status != body.expected_status && current.status != body.new_status {
        return Err(ControlPlaneError::StatusConflict {
            run_id,
            expected: format!("{:?}", body.expected_status),
            actual: format!("{:?}", current.status),
        });
    }

    if body.new_status.is_terminal() {
        state
            .runs
            .mark_completed(run_id, body.new_status, body.error_message.as_deref())
            .await?;
    } else {
        state
            .runs
            .transition_status(run_id, body.expected_status, body.new_status)
            .await?;
    }

    let run = state.runs.get(run_id).await?;
    tracing::info!(%run_id, status = ?run.status, "run status updated");
    Ok(Json(UpdateRunStatusResponse {
        run_id,
        status: run.status,
    }))
}

/// Used only by the timeout monitor; kept here so the "what counts as
/// overdue" calculation lives beside the rest of the Run lifecycle logic.
pub fn is_overdue(run: &Run, timeout_seconds: i64) -> bool {
    match run.started_at {
        Some(started) => (Utc::now() - started).num_seconds() > timeout_seconds,
        None => false,
    }
}
