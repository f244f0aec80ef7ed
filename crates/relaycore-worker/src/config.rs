// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the orchestrator worker.

use anyhow::{Context, Result};

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub gateway_url: String,

    pub queue_url: String,
    pub dlq_url: String,

    /// C: number of step executions in flight per process.
    pub concurrency: usize,
    /// Cap on concurrent outbound gateway calls, independent of `concurrency`,
    /// so one slow provider can't head-of-line block the rest of the batch.
    pub gateway_concurrency: usize,

    pub poll_interval_secs: u64,
    pub empty_poll_backoff_secs: u64,
    pub queue_wait_secs: i32,
    pub queue_max_messages: i32,
    pub visibility_timeout_secs: i32,

    pub step_default_timeout_secs: u64,
    pub step_max_retries: i32,
    pub step_retry_base_secs: u64,
    pub step_retry_max_secs: u64,

    pub http_tool_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            gateway_url: std::env::var("GATEWAY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8081".to_string()),

            queue_url: std::env::var("STEP_QUEUE_URL").context("STEP_QUEUE_URL is required")?,
            dlq_url: std::env::var("STEP_DLQ_URL").context("STEP_DLQ_URL is required")?,

            concurrency: env_parse("WORKER_CONCURRENCY", 5)?,
            gateway_concurrency: env_parse("WORKER_GATEWAY_CONCURRENCY", 10)?,

            poll_interval_secs: env_parse("WORKER_POLL_INTERVAL_SECONDS", 5)?,
            empty_poll_backoff_secs: env_parse("WORKER_EMPTY_POLL_BACKOFF_SECONDS", 1)?,
            queue_wait_secs: env_parse("QUEUE_WAIT_SECONDS", 20)?,
            queue_max_messages: env_parse("QUEUE_MAX_MESSAGES", 10)?,
            visibility_timeout_secs: env_parse("QUEUE_VISIBILITY_TIMEOUT", 300)?,

            step_default_timeout_secs: env_parse("STEP_DEFAULT_TIMEOUT", 300)?,
            step_max_retries: env_parse("STEP_MAX_RETRIES", 3)?,
            step_retry_base_secs: env_parse("STEP_RETRY_BASE_SECONDS", 2)?,
            step_retry_max_secs: env_parse("STEP_RETRY_MAX_SECONDS", 60)?,

            http_tool_timeout_secs: env_parse("WORKER_HTTP_TOOL_TIMEOUT_SECONDS", 30)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v.parse::<T>().map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}
