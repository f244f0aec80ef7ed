// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{Result, StateError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(5)
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))
}

/// Creates the Tenant/Task/Run/Step tables if they don't already exist.
/// RelayCore ships no numbered migration files; schema evolution for this
/// service has stayed additive enough that idempotent `CREATE TABLE IF NOT
/// EXISTS` has been sufficient in practice.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            token_budget_monthly BIGINT NOT NULL,
            token_used_current_month BIGINT NOT NULL DEFAULT 0,
            rate_limit_per_minute INTEGER NOT NULL,
            status VARCHAR(20) NOT NULL DEFAULT 'active'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            name VARCHAR(255) NOT NULL,
            task_config JSONB NOT NULL,
            default_token_budget BIGINT NOT NULL,
            timeout_seconds BIGINT NOT NULL,
            max_retries INTEGER NOT NULL DEFAULT 3,
            is_active BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_tenant ON tasks(tenant_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id UUID PRIMARY KEY,
            task_id UUID NOT NULL REFERENCES tasks(id),
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            created_by UUID NOT NULL,
            status VARCHAR(20) NOT NULL DEFAULT 'pending',
            token_budget BIGINT NOT NULL,
            tokens_used BIGINT NOT NULL DEFAULT 0,
            estimated_cost_usd DOUBLE PRECISION NOT NULL DEFAULT 0,
            started_at TIMESTAMP WITH TIME ZONE,
            completed_at TIMESTAMP WITH TIME ZONE,
            duration_seconds BIGINT,
            current_step VARCHAR(255),
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_tenant ON runs(tenant_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS steps (
            id UUID PRIMARY KEY,
            run_id UUID NOT NULL REFERENCES runs(id),
            step_name VARCHAR(255) NOT NULL,
            step_type VARCHAR(20) NOT NULL,
            step_order INTEGER NOT NULL,
            status VARCHAR(20) NOT NULL DEFAULT 'queued',
            attempt_number INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            input_data JSONB NOT NULL DEFAULT '{}',
            output_data JSONB,
            error_message TEXT,
            tokens_used BIGINT NOT NULL DEFAULT 0,
            cost_usd DOUBLE PRECISION NOT NULL DEFAULT 0,
            started_at TIMESTAMP WITH TIME ZONE,
            completed_at TIMESTAMP WITH TIME ZONE
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_steps_run ON steps(run_id, step_order)")
        .execute(pool)
        .await?;

    Ok(())
}
