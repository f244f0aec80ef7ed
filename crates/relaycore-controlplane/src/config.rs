// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the control-plane writer.

use anyhow::{Context, Result};

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub queue_url: String,
    /// Never sent to by this process (it only enqueues new runs), but
    /// required to construct the shared [`relaycore_queue::SqsStepQueue`].
    pub dlq_url: String,

    pub visibility_timeout_secs: i32,

    /// How often the timeout monitor scans for overrunning Runs.
    pub timeout_monitor_interval_secs: u64,
    /// Timeout applied to a Run whose Task carries `timeout_seconds == 0`.
    pub default_run_timeout_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: std::env::var("CONTROLPLANE_PORT")
                .unwrap_or_else(|_| "8082".to_string())
                .parse()
                .context("invalid CONTROLPLANE_PORT")?,
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            queue_url: std::env::var("STEP_QUEUE_URL").context("STEP_QUEUE_URL is required")?,
            dlq_url: std::env::var("STEP_DLQ_URL").context("STEP_DLQ_URL is required")?,
            visibility_timeout_secs: env_parse("QUEUE_VISIBILITY_TIMEOUT", 300)?,

            timeout_monitor_interval_secs: env_parse("RUN_TIMEOUT_MONITOR_INTERVAL_SECONDS", 15)?,
            default_run_timeout_secs: env_parse("RUN_DEFAULT_TIMEOUT_SECONDS", 3600)?,
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
