//! Configuration for the LLM gateway.
//!
//! All secrets are injected via environment variables at runtime; the
//! source code contains no secrets.

use anyhow::{Context, Result};

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,

    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub local_provider_enabled: bool,

    /// Failover order when a request does not name a preferred provider.
    pub provider_priority: Vec<String>,

    pub circuit_breaker_enabled: bool,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_timeout_secs: u64,

    pub budget_check_enabled: bool,
    pub budget_soft_limit_percent: f64,

    pub rate_limit_enabled: bool,
    pub rate_limit_requests_per_minute: u64,
    pub rate_limit_window_secs: u64,

    pub usage_reconcile_interval_secs: u64,

    pub audit_retention_days: u32,
    pub audit_cleanup_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: std::env::var("GATEWAY_PORT")
                .unwrap_or_else(|_| "8081".to_string())
                .parse()
                .context("invalid GATEWAY_PORT")?,
            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL is required")?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            local_provider_enabled: std::env::var("LOCAL_PROVIDER_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            provider_priority: std::env::var("PROVIDER_PRIORITY")
                .unwrap_or_else(|_| "openai,anthropic,local".to_string())
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),

            circuit_breaker_enabled: std::env::var("CIRCUIT_BREAKER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            circuit_breaker_failure_threshold: std::env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("invalid CIRCUIT_BREAKER_FAILURE_THRESHOLD")?,
            circuit_breaker_timeout_secs: std::env::var("CIRCUIT_BREAKER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("invalid CIRCUIT_BREAKER_TIMEOUT_SECS")?,

            budget_check_enabled: std::env::var("BUDGET_CHECK_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            budget_soft_limit_percent: std::env::var("BUDGET_SOFT_LIMIT_PERCENT")
                .unwrap_or_else(|_| "80.0".to_string())
                .parse()
                .context("invalid BUDGET_SOFT_LIMIT_PERCENT")?,

            rate_limit_enabled: std::env::var("RATE_LIMIT_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            rate_limit_requests_per_minute: std::env::var("RATE_LIMIT_REQUESTS_PER_MINUTE")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("invalid RATE_LIMIT_REQUESTS_PER_MINUTE")?,
            rate_limit_window_secs: std::env::var("RATE_LIMIT_WINDOW_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("invalid RATE_LIMIT_WINDOW_SECONDS")?,

            usage_reconcile_interval_secs: std::env::var("USAGE_RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("invalid USAGE_RECONCILE_INTERVAL_SECS")?,

            audit_retention_days: std::env::var("AUDIT_RETENTION_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .context("invalid AUDIT_RETENTION_DAYS")?,
            audit_cleanup_interval_secs: std::env::var("AUDIT_CLEANUP_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("invalid AUDIT_CLEANUP_INTERVAL_SECS")?,
        })
    }

    pub fn has_llm_provider(&self) -> bool {
        self.openai_api_key.is_some()
            || self.anthropic_api_key.is_some()
            || self.local_provider_enabled
    }
}
