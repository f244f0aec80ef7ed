// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Postgres-backed repositories for the Tenant/Task/Run/Step model. Status
//! transitions are compare-and-set on `(id, expected_status)` so two workers
//! racing on redelivery of the same message can't both "win" the same
//! transition.

use chrono::{DateTime, Utc};
use relaycore_core::domain::{
    Run, RunStatus, Step, StepSpec, StepStatus, StepType, Task, Tenant, TenantStatus,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{Result, StateError};

#[derive(FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    token_budget_monthly: i64,
    token_used_current_month: i64,
    rate_limit_per_minute: i32,
    status: String,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = StateError;

    fn try_from(row: TenantRow) -> std::result::Result<Self, Self::Error> {
        Ok(Tenant {
            id: row.id,
            name: row.name,
            token_budget_monthly: row.token_budget_monthly,
            token_used_current_month: row.token_used_current_month,
            rate_limit_per_minute: row.rate_limit_per_minute,
            status: match row.status.as_str() {
                "active" => TenantStatus::Active,
                _ => TenantStatus::Suspended,
            },
        })
    }
}

pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> Result<Tenant> {
        let row: TenantRow = sqlx::query_as(
            "SELECT id, name, token_budget_monthly, token_used_current_month, rate_limit_per_minute, status \
             FROM tenants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StateError::TenantNotFound(id))?;
        row.try_into()
    }

    /// Adds `delta` tokens to the tenant's monthly counter. Used by the
    /// periodic reconciliation job to fold Redis-observed usage back into
    /// the relational source of truth.
    pub async fn add_token_usage(&self, id: Uuid, delta: i64) -> Result<()> {
        sqlx::query("UPDATE tenants SET token_used_current_month = token_used_current_month + $1 WHERE id = $2")
            .bind(delta)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn reset_monthly_usage(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE tenants SET token_used_current_month = 0 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All tenant ids, for the reconciler's calendar-month reset sweep.
    pub async fn list_ids(&self) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM tenants")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    task_config: serde_json::Value,
    default_token_budget: i64,
    timeout_seconds: i64,
    max_retries: i32,
    is_active: bool,
}

impl TryFrom<TaskRow> for Task {
    type Error = StateError;

    fn try_from(row: TaskRow) -> std::result::Result<Self, Self::Error> {
        let task_config: Vec<StepSpec> = serde_json::from_value(row.task_config)
            .map_err(|e| StateError::Database(format!("malformed task_config: {e}")))?;
        Ok(Task {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            task_config,
            default_token_budget: row.default_token_budget,
            timeout_seconds: row.timeout_seconds,
            max_retries: row.max_retries,
            is_active: row.is_active,
        })
    }
}

pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> Result<Task> {
        let row: TaskRow = sqlx::query_as(
            "SELECT id, tenant_id, name, task_config, default_token_budget, timeout_seconds, max_retries, is_active \
             FROM tasks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StateError::TaskNotFound(id))?;
        row.try_into()
    }

    pub async fn create(&self, task: &Task) -> Result<()> {
        let task_config = serde_json::to_value(&task.task_config)
            .map_err(|e| StateError::Database(e.to_string()))?;
        sqlx::query(
            "INSERT INTO tasks (id, tenant_id, name, task_config, default_token_budget, timeout_seconds, max_retries, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(task.id)
        .bind(task.tenant_id)
        .bind(&task.name)
        .bind(task_config)
        .bind(task.default_token_budget)
        .bind(task.timeout_seconds)
        .bind(task.max_retries)
        .bind(task.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn run_status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
        RunStatus::Timeout => "timeout",
        RunStatus::BudgetExceeded => "budget_exceeded",
    }
}

fn parse_run_status(s: &str) -> RunStatus {
    match s {
        "pending" => RunStatus::Pending,
        "running" => RunStatus::Running,
        "completed" => RunStatus::Completed,
        "failed" => RunStatus::Failed,
        "cancelled" => RunStatus::Cancelled,
        "timeout" => RunStatus::Timeout,
        "budget_exceeded" => RunStatus::BudgetExceeded,
        other => unreachable!("unknown run status persisted: {other}"),
    }
}

#[derive(FromRow)]
struct RunRow {
    id: Uuid,
    task_id: Uuid,
    tenant_id: Uuid,
    created_by: Uuid,
    status: String,
    token_budget: i64,
    tokens_used: i64,
    estimated_cost_usd: f64,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
    current_step: Option<String>,
    error_message: Option<String>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Run {
            id: row.id,
            task_id: row.task_id,
            tenant_id: row.tenant_id,
            created_by: row.created_by,
            status: parse_run_status(&row.status),
            token_budget: row.token_budget,
            tokens_used: row.tokens_used,
            estimated_cost_usd: row.estimated_cost_usd,
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration_seconds: row.duration_seconds,
            current_step: row.current_step,
            error_message: row.error_message,
        }
    }
}

pub struct RunRepository {
    pool: PgPool,
}

impl RunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, run: &Run) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (id, task_id, tenant_id, created_by, status, token_budget, tokens_used, estimated_cost_usd) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(run.id)
        .bind(run.task_id)
        .bind(run.tenant_id)
        .bind(run.created_by)
        .bind(run_status_str(run.status))
        .bind(run.token_budget)
        .bind(run.tokens_used)
        .bind(run.estimated_cost_usd)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Run> {
        let row: RunRow = sqlx::query_as(
            "SELECT id, task_id, tenant_id, created_by, status, token_budget, tokens_used, estimated_cost_usd, \
             started_at, completed_at, duration_seconds, current_step, error_message FROM runs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StateError::RunNotFound(id))?;
        Ok(row.into())
    }

    /// Moves `id` from `expected` to `next`, returning a conflict error if
    /// another worker already transitioned it away from `expected`. Safe to
    /// call twice for the same terminal transition: if `id` is already in
    /// `next`, this is a no-op success (at-least-once redelivery).
    pub async fn transition_status(&self, id: Uuid, expected: RunStatus, next: RunStatus) -> Result<()> {
        let result = sqlx::query("UPDATE runs SET status = $1 WHERE id = $2 AND status = $3")
            .bind(run_status_str(next))
            .bind(id)
            .bind(run_status_str(expected))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current = self.get(id).await?;
        if current.status == next {
            return Ok(());
        }

        Err(StateError::TransitionConflict {
            entity: "run",
            id,
            expected: run_status_str(expected).to_string(),
        })
    }

    pub async fn mark_started(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE runs SET started_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Stamps `completed_at`/`duration_seconds` and sets the terminal
    /// status. Guarded by `status != $1` so replaying the same terminal
    /// transition (an at-least-once queue redelivery, or a second parallel
    /// child racing the same run to failure) is a no-op rather than pushing
    /// `completed_at` forward and inflating `duration_seconds` on every
    /// replay.
    pub async fn mark_completed(&self, id: Uuid, status: RunStatus, error_message: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET status = $1, completed_at = now(), \
             duration_seconds = EXTRACT(EPOCH FROM (now() - started_at))::BIGINT, error_message = $2 \
             WHERE id = $3 AND status != $1",
        )
        .bind(run_status_str(status))
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_current_step(&self, id: Uuid, step_name: &str) -> Result<()> {
        sqlx::query("UPDATE runs SET current_step = $1 WHERE id = $2")
            .bind(step_name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_tokens_used(&self, id: Uuid, tokens: i64, cost_usd: f64) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET tokens_used = tokens_used + $1, estimated_cost_usd = estimated_cost_usd + $2 WHERE id = $3",
        )
        .bind(tokens)
        .bind(cost_usd)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_running_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Run>> {
        let rows: Vec<RunRow> = sqlx::query_as(
            "SELECT id, task_id, tenant_id, created_by, status, token_budget, tokens_used, estimated_cost_usd, \
             started_at, completed_at, duration_seconds, current_step, error_message FROM runs \
             WHERE status = 'running' AND started_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Run::from).collect())
    }
}

fn step_type_str(t: StepType) -> &'static str {
    match t {
        StepType::Llm => "llm",
        StepType::Tool => "tool",
        StepType::Decision => "decision",
        StepType::Parallel => "parallel",
    }
}

fn parse_step_type(s: &str) -> StepType {
    match s {
        "llm" => StepType::Llm,
        "tool" => StepType::Tool,
        "decision" => StepType::Decision,
        "parallel" => StepType::Parallel,
        other => unreachable!("unknown step type persisted: {other}"),
    }
}

fn step_status_str(s: StepStatus) -> &'static str {
    match s {
        StepStatus::Queued => "queued",
        StepStatus::Running => "running",
        StepStatus::Success => "success",
        StepStatus::Failed => "failed",
        StepStatus::Retrying => "retrying",
        StepStatus::Skipped => "skipped",
    }
}

fn parse_step_status(s: &str) -> StepStatus {
    match s {
        "queued" => StepStatus::Queued,
        "running" => StepStatus::Running,
        "success" => StepStatus::Success,
        "failed" => StepStatus::Failed,
        "retrying" => StepStatus::Retrying,
        "skipped" => StepStatus::Skipped,
        other => unreachable!("unknown step status persisted: {other}"),
    }
}

#[derive(FromRow)]
struct StepRow {
    id: Uuid,
    run_id: Uuid,
    step_name: String,
    step_type: String,
    step_order: i32,
    status: String,
    attempt_number: i32,
    max_attempts: i32,
    input_data: serde_json::Value,
    output_data: Option<serde_json::Value>,
    error_message: Option<String>,
    tokens_used: i64,
    cost_usd: f64,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<StepRow> for Step {
    fn from(row: StepRow) -> Self {
        Step {
            id: row.id,
            run_id: row.run_id,
            step_name: row.step_name,
            step_type: parse_step_type(&row.step_type),
            step_order: row.step_order,
            status: parse_step_status(&row.status),
            attempt_number: row.attempt_number,
            max_attempts: row.max_attempts,
            input_data: row.input_data,
            output_data: row.output_data,
            error_message: row.error_message,
            tokens_used: row.tokens_used,
            cost_usd: row.cost_usd,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

pub struct StepRepository {
    pool: PgPool,
}

impl StepRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, step: &Step) -> Result<()> {
        sqlx::query(
            "INSERT INTO steps (id, run_id, step_name, step_type, step_order, status, attempt_number, max_attempts, input_data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(step.id)
        .bind(step.run_id)
        .bind(&step.step_name)
        .bind(step_type_str(step.step_type))
        .bind(step.step_order)
        .bind(step_status_str(step.status))
        .bind(step.attempt_number)
        .bind(step.max_attempts)
        .bind(&step.input_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Step> {
        let row: StepRow = sqlx::query_as(
            "SELECT id, run_id, step_name, step_type, step_order, status, attempt_number, max_attempts, \
             input_data, output_data, error_message, tokens_used, cost_usd, started_at, completed_at \
             FROM steps WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StateError::StepNotFound(id))?;
        Ok(row.into())
    }

    pub async fn list_by_run(&self, run_id: Uuid) -> Result<Vec<Step>> {
        let rows: Vec<StepRow> = sqlx::query_as(
            "SELECT id, run_id, step_name, step_type, step_order, status, attempt_number, max_attempts, \
             input_data, output_data, error_message, tokens_used, cost_usd, started_at, completed_at \
             FROM steps WHERE run_id = $1 ORDER BY step_order ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Step::from).collect())
    }

    /// Compare-and-set transition. Succeeds as a no-op if `id` is already in
    /// `next`, matching the terminal-transition idempotence the at-least-once
    /// queue relies on.
    pub async fn transition_status(
        &self,
        id: Uuid,
        expected: StepStatus,
        next: StepStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE steps SET status = $1 WHERE id = $2 AND status = $3")
            .bind(step_status_str(next))
            .bind(id)
            .bind(step_status_str(expected))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current = self.get(id).await?;
        if current.status == next {
            return Ok(());
        }

        Err(StateError::TransitionConflict {
            entity: "step",
            id,
            expected: step_status_str(expected).to_string(),
        })
    }

    pub async fn mark_running(&self, id: Uuid, attempt_number: i32) -> Result<()> {
        sqlx::query("UPDATE steps SET status = 'running', attempt_number = $1, started_at = now() WHERE id = $2")
            .bind(attempt_number)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a retryable failure without touching `completed_at`:
    /// `retrying` carries no persisted "done" semantics, the step picks up
    /// again at `running` once the queue redelivers it.
    pub async fn mark_retrying(&self, id: Uuid, error_message: &str) -> Result<()> {
        sqlx::query("UPDATE steps SET status = 'retrying', error_message = $1 WHERE id = $2")
            .bind(error_message)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_result(
        &self,
        id: Uuid,
        status: StepStatus,
        output_data: Option<serde_json::Value>,
        error_message: Option<&str>,
        tokens_used: i64,
        cost_usd: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE steps SET status = $1, output_data = $2, error_message = $3, \
             tokens_used = tokens_used + $4, cost_usd = cost_usd + $5, completed_at = now() WHERE id = $6",
        )
        .bind(step_status_str(status))
        .bind(output_data)
        .bind(error_message)
        .bind(tokens_used)
        .bind(cost_usd)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
