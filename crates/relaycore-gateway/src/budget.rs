//! Token budget enforcement.
//!
//! Real-time usage lives in Redis for fast checks on the request path;
//! Postgres remains the source of truth and is reconciled periodically
//! by [`crate::reconcile`].

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use relaycore_state::TenantRepository;
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize)]
pub struct BudgetStatus {
    pub allowed: bool,
    pub budget_monthly: i64,
    pub used_current_month: i64,
    pub remaining: i64,
    pub percentage_used: f64,
    pub soft_limit_reached: bool,
    pub hard_limit_reached: bool,
    /// Whether `used_current_month` came from the Redis cache rather than a
    /// Postgres fallback read, tracked for the `cache_hit_rate` health field.
    pub cache_hit: bool,
}

pub struct BudgetEnforcer {
    redis: ConnectionManager,
    tenants: TenantRepository,
    soft_limit_percent: f64,
    enabled: bool,
}

fn usage_key(tenant_id: Uuid) -> String {
    format!("relaycore:budget:{tenant_id}:used")
}

impl BudgetEnforcer {
    pub fn new(
        redis: ConnectionManager,
        tenants: TenantRepository,
        soft_limit_percent: f64,
        enabled: bool,
    ) -> Self {
        Self {
            redis,
            tenants,
            soft_limit_percent,
            enabled,
        }
    }

    /// Checks whether `estimated_tokens` more usage would put the tenant
    /// over its monthly budget. Falls back to Postgres on a Redis cache miss,
    /// warming the cache with a 60 second TTL.
    pub async fn check_budget(
        &self,
        tenant_id: Uuid,
        estimated_tokens: i64,
    ) -> crate::error::Result<BudgetStatus> {
        if !self.enabled {
            return Ok(BudgetStatus {
                allowed: true,
                budget_monthly: 0,
                used_current_month: 0,
                remaining: i64::MAX,
                percentage_used: 0.0,
                soft_limit_reached: false,
                hard_limit_reached: false,
                cache_hit: true,
            });
        }

        let tenant = self
            .tenants
            .get(tenant_id)
            .await
            .map_err(|e| crate::error::GatewayError::Internal(e.to_string()))?;

        let mut conn = self.redis.clone();
        let cached_used: Option<i64> = conn.get(usage_key(tenant_id)).await.ok();
        let cache_hit = cached_used.is_some();
        let used_current_month = match cached_used {
            Some(used) => used,
            None => {
                let _: Result<(), _> = conn
                    .set_ex(usage_key(tenant_id), tenant.token_used_current_month, 60)
                    .await;
                tenant.token_used_current_month
            }
        };

        Ok(self.check_limits(tenant.token_budget_monthly, used_current_month, estimated_tokens, cache_hit))
    }

    fn check_limits(
        &self,
        budget_monthly: i64,
        used_current_month: i64,
        estimated_tokens: i64,
        cache_hit: bool,
    ) -> BudgetStatus {
        let remaining = budget_monthly - used_current_month;
        let percentage_used = if budget_monthly > 0 {
            (used_current_month as f64 / budget_monthly as f64) * 100.0
        } else {
            100.0
        };

        let hard_limit_reached = (used_current_month + estimated_tokens) >= budget_monthly;
        let soft_limit_threshold = budget_monthly as f64 * (self.soft_limit_percent / 100.0);
        let soft_limit_reached =
            (used_current_month as f64) >= soft_limit_threshold && !hard_limit_reached;

        if hard_limit_reached {
            tracing::warn!(budget_monthly, used_current_month, "budget hard limit reached");
        } else if soft_limit_reached {
            tracing::info!(budget_monthly, used_current_month, "budget soft limit reached");
        }

        BudgetStatus {
            allowed: !hard_limit_reached,
            budget_monthly,
            used_current_month,
            remaining: remaining.max(0),
            percentage_used: (percentage_used * 100.0).round() / 100.0,
            soft_limit_reached,
            hard_limit_reached,
            cache_hit,
        }
    }

    /// Bumps the Redis-cached usage counter immediately. Postgres is
    /// updated out-of-band by the reconciliation loop.
    pub async fn increment_usage(&self, tenant_id: Uuid, tokens_used: i64) {
        let mut conn = self.redis.clone();
        let _: Result<(), _> = conn.incr(usage_key(tenant_id), tokens_used).await;
    }
}

pub struct RateLimitStatus {
    pub allowed: bool,
    pub limit: u64,
    pub current: u64,
    pub remaining: u64,
    pub reset_seconds: u64,
}

pub struct RateLimiter {
    redis: ConnectionManager,
    tenants: TenantRepository,
    default_limit: u64,
    window_secs: u64,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(
        redis: ConnectionManager,
        tenants: TenantRepository,
        default_limit: u64,
        window_secs: u64,
        enabled: bool,
    ) -> Self {
        Self {
            redis,
            tenants,
            default_limit,
            window_secs,
            enabled,
        }
    }

    fn allowed_status(&self, limit: u64) -> RateLimitStatus {
        RateLimitStatus {
            allowed: true,
            limit,
            current: 0,
            remaining: limit,
            reset_seconds: self.window_secs,
        }
    }

    /// Enforces `tenant.rate_limit_per_minute`, falling back to the
    /// process-wide default when the tenant lookup fails so a Postgres
    /// hiccup doesn't block every request.
    pub async fn check_rate_limit(&self, tenant_id: Uuid) -> RateLimitStatus {
        if !self.enabled {
            return self.allowed_status(self.default_limit);
        }

        let limit = match self.tenants.get(tenant_id).await {
            Ok(tenant) if tenant.rate_limit_per_minute > 0 => tenant.rate_limit_per_minute as u64,
            Ok(_) => self.default_limit,
            Err(e) => {
                tracing::warn!(%tenant_id, error = %e, "rate limiter tenant lookup failed, using default limit");
                self.default_limit
            }
        };

        let key = format!("relaycore:ratelimit:{tenant_id}");
        let mut conn = self.redis.clone();

        let current: u64 = match conn.incr(&key, 1u64).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "rate limiter redis error, failing open");
                return self.allowed_status(limit);
            }
        };
        if current == 1 {
            let _: Result<(), _> = conn.expire(&key, self.window_secs as i64).await;
        }

        let allowed = current <= limit;
        let remaining = limit.saturating_sub(current);

        if !allowed {
            tracing::warn!(%tenant_id, current, limit, "rate limit exceeded");
        }

        RateLimitStatus {
            allowed,
            limit,
            current,
            remaining,
            reset_seconds: self.window_secs,
        }
    }
}
