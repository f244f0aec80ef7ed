// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background reconciliation: folds the Redis-observed usage counter into
//! Postgres's `token_used_current_month` periodically, and resets it at the
//! UTC calendar month boundary.

use chrono::{Datelike, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use relaycore_state::TenantRepository;
use std::time::Duration;
use uuid::Uuid;

pub struct Reconciler {
    redis: ConnectionManager,
    tenants: TenantRepository,
    interval_secs: u64,
    last_reset_month: Option<u32>,
}

impl Reconciler {
    pub fn new(redis: ConnectionManager, tenants: TenantRepository, interval_secs: u64) -> Self {
        Self {
            redis,
            tenants,
            interval_secs,
            last_reset_month: None,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                tracing::warn!(error = %e, "usage reconciliation pass failed");
            }
        }
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        self.fold_usage_counters().await?;
        self.reset_on_month_boundary().await?;
        Ok(())
    }

    /// Atomically fetches and zeroes each tenant's cached usage key via
    /// `GETSET`, then adds the fetched value onto Postgres. `GETSET` reads
    /// and resets in one round trip, so an `INCR` from a concurrent
    /// `increment_usage` call either lands before the fetch (and is folded
    /// in) or after the reset (and is preserved for the next pass) — never
    /// lost in between, the way a plain `GET` followed by `DEL` would lose
    /// it.
    async fn fold_usage_counters(&mut self) -> anyhow::Result<()> {
        let mut conn = self.redis.clone();
        let keys: Vec<String> = conn.keys("relaycore:budget:*:used").await.unwrap_or_default();

        for key in keys {
            let Some(tenant_id) = tenant_id_from_key(&key) else {
                continue;
            };
            let delta: i64 = match conn.getset(&key, 0i64).await {
                Ok(v) => v,
                Err(_) => continue,
            };
            if delta == 0 {
                continue;
            }
            if self.tenants.add_token_usage(tenant_id, delta).await.is_err() {
                // Postgres write failed; restore the delta so the next pass
                // retries it instead of silently dropping the usage.
                let _: Result<(), _> = conn.incr(&key, delta).await;
            }
        }
        Ok(())
    }

    async fn reset_on_month_boundary(&mut self) -> anyhow::Result<()> {
        let current_month = Utc::now().month();
        if self.last_reset_month == Some(current_month) {
            return Ok(());
        }
        let first_run = self.last_reset_month.is_none();
        self.last_reset_month = Some(current_month);
        if first_run {
            // Don't reset every tenant's usage the moment the process
            // starts; only once we've observed an actual boundary crossing.
            return Ok(());
        }

        tracing::info!("UTC month boundary crossed, resetting tenant usage counters");
        let mut conn = self.redis.clone();
        for tenant_id in self.tenants.list_ids().await?.into_iter() {
            self.tenants.reset_monthly_usage(tenant_id).await?;
            let _: Result<(), _> = conn.del(format!("relaycore:budget:{tenant_id}:used")).await;
        }
        Ok(())
    }
}

fn tenant_id_from_key(key: &str) -> Option<Uuid> {
    key.strip_prefix("relaycore:budget:")
        .and_then(|rest| rest.strip_suffix(":used"))
        .and_then(|id| Uuid::parse_str(id).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tenant_id_from_usage_key() {
        let id = Uuid::new_v4();
        let key = format!("relaycore:budget:{id}:used");
        assert_eq!(tenant_id_from_key(&key), Some(id));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert_eq!(tenant_id_from_key("relaycore:ratelimit:not-a-uuid"), None);
    }
}
