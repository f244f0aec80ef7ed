// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::storage::{AuditStorage, Result, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaycore_core::domain::{LlmEvent, ToolEvent};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use uuid::Uuid;

pub struct DatabaseAuditStorage {
    pool: PgPool,
}

impl DatabaseAuditStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(2)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS llm_events (
                id UUID PRIMARY KEY,
                run_id UUID NOT NULL,
                step_id UUID NOT NULL,
                tenant_id UUID NOT NULL,
                provider VARCHAR(64) NOT NULL,
                model VARCHAR(128) NOT NULL,
                prompt_tokens BIGINT NOT NULL,
                completion_tokens BIGINT NOT NULL,
                total_tokens BIGINT NOT NULL,
                cost_usd DOUBLE PRECISION NOT NULL,
                latency_ms BIGINT NOT NULL,
                status VARCHAR(32) NOT NULL,
                error_message TEXT,
                is_fallback BOOLEAN NOT NULL DEFAULT FALSE,
                attempted_providers JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_llm_events_run ON llm_events(run_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_llm_events_tenant ON llm_events(tenant_id, created_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tool_events (
                id UUID PRIMARY KEY,
                run_id UUID NOT NULL,
                step_id UUID NOT NULL,
                tenant_id UUID NOT NULL,
                tool_name VARCHAR(128) NOT NULL,
                tool_action VARCHAR(128) NOT NULL,
                input_params JSONB NOT NULL,
                output_data JSONB,
                duration_seconds BIGINT NOT NULL,
                status VARCHAR(32) NOT NULL,
                error_message TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tool_events_run ON tool_events(run_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[derive(FromRow)]
struct LlmEventRow {
    id: Uuid,
    run_id: Uuid,
    step_id: Uuid,
    tenant_id: Uuid,
    provider: String,
    model: String,
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    cost_usd: f64,
    latency_ms: i64,
    status: String,
    error_message: Option<String>,
    is_fallback: bool,
    attempted_providers: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<LlmEventRow> for LlmEvent {
    fn from(row: LlmEventRow) -> Self {
        LlmEvent {
            id: row.id,
            run_id: row.run_id,
            step_id: row.step_id,
            tenant_id: row.tenant_id,
            provider: row.provider,
            model: row.model,
            prompt_tokens: row.prompt_tokens,
            completion_tokens: row.completion_tokens,
            total_tokens: row.total_tokens,
            cost_usd: row.cost_usd,
            latency_ms: row.latency_ms,
            status: row.status,
            error_message: row.error_message,
            is_fallback: row.is_fallback,
            attempted_providers: serde_json::from_value(row.attempted_providers)
                .unwrap_or_default(),
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ToolEventRow {
    id: Uuid,
    run_id: Uuid,
    step_id: Uuid,
    tenant_id: Uuid,
    tool_name: String,
    tool_action: String,
    input_params: serde_json::Value,
    output_data: Option<serde_json::Value>,
    duration_seconds: i64,
    status: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ToolEventRow> for ToolEvent {
    fn from(row: ToolEventRow) -> Self {
        ToolEvent {
            id: row.id,
            run_id: row.run_id,
            step_id: row.step_id,
            tenant_id: row.tenant_id,
            tool_name: row.tool_name,
            tool_action: row.tool_action,
            input_params: row.input_params,
            output_data: row.output_data,
            duration_seconds: row.duration_seconds,
            status: row.status,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl AuditStorage for DatabaseAuditStorage {
    async fn store_llm_event(&self, event: &LlmEvent) -> Result<()> {
        let attempted = serde_json::to_value(&event.attempted_providers)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO llm_events (
                id, run_id, step_id, tenant_id, provider, model, prompt_tokens,
                completion_tokens, total_tokens, cost_usd, latency_ms, status,
                error_message, is_fallback, attempted_providers, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(event.id)
        .bind(event.run_id)
        .bind(event.step_id)
        .bind(event.tenant_id)
        .bind(&event.provider)
        .bind(&event.model)
        .bind(event.prompt_tokens)
        .bind(event.completion_tokens)
        .bind(event.total_tokens)
        .bind(event.cost_usd)
        .bind(event.latency_ms)
        .bind(&event.status)
        .bind(&event.error_message)
        .bind(event.is_fallback)
        .bind(attempted)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn store_tool_event(&self, event: &ToolEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tool_events (
                id, run_id, step_id, tenant_id, tool_name, tool_action,
                input_params, output_data, duration_seconds, status, error_message, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.id)
        .bind(event.run_id)
        .bind(event.step_id)
        .bind(event.tenant_id)
        .bind(&event.tool_name)
        .bind(&event.tool_action)
        .bind(&event.input_params)
        .bind(&event.output_data)
        .bind(event.duration_seconds)
        .bind(&event.status)
        .bind(&event.error_message)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn llm_events_for_run(&self, run_id: Uuid) -> Result<Vec<LlmEvent>> {
        let rows: Vec<LlmEventRow> = sqlx::query_as(
            "SELECT id, run_id, step_id, tenant_id, provider, model, prompt_tokens, completion_tokens, \
             total_tokens, cost_usd, latency_ms, status, error_message, is_fallback, attempted_providers, created_at \
             FROM llm_events WHERE run_id = $1 ORDER BY created_at ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LlmEvent::from).collect())
    }

    async fn tool_events_for_run(&self, run_id: Uuid) -> Result<Vec<ToolEvent>> {
        let rows: Vec<ToolEventRow> = sqlx::query_as(
            "SELECT id, run_id, step_id, tenant_id, tool_name, tool_action, input_params, output_data, \
             duration_seconds, status, error_message, created_at FROM tool_events WHERE run_id = $1 ORDER BY created_at ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ToolEvent::from).collect())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let llm_deleted = sqlx::query("DELETE FROM llm_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let tool_deleted = sqlx::query("DELETE FROM tool_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(llm_deleted + tool_deleted)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
