// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::storage::{AuditStorageRef, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::time;

/// Deletes LLM/tool event rows past their retention window.
pub struct AuditRetentionManager {
    storage: AuditStorageRef,
    retention_days: u32,
}

impl AuditRetentionManager {
    pub fn new(storage: AuditStorageRef, retention_days: u32) -> Self {
        Self {
            storage,
            retention_days,
        }
    }

    pub async fn cleanup(&self) -> Result<u64> {
        let cutoff = self.cutoff_date();

        tracing::info!(retention_days = self.retention_days, cutoff_date = %cutoff, "running audit log cleanup");

        let deleted = self.storage.delete_older_than(cutoff).await?;

        tracing::info!(deleted_count = deleted, "audit log cleanup completed");

        Ok(deleted)
    }

    pub fn start_background_cleanup(
        self: Arc<Self>,
        interval: time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval_timer = time::interval(interval);

            loop {
                interval_timer.tick().await;

                match self.cleanup().await {
                    Ok(deleted) => {
                        tracing::debug!(deleted_count = deleted, "background cleanup completed");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "background cleanup failed");
                    }
                }
            }
        })
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    pub fn cutoff_date(&self) -> DateTime<Utc> {
        Utc::now() - Duration::days(self.retention_days as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AuditStorage;
    use async_trait::async_trait;
    use relaycore_core::domain::{LlmEvent, ToolEvent};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct MockStorage {
        events: Mutex<Vec<LlmEvent>>,
    }

    #[async_trait]
    impl AuditStorage for MockStorage {
        async fn store_llm_event(&self, event: &LlmEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn store_tool_event(&self, _event: &ToolEvent) -> Result<()> {
            Ok(())
        }

        async fn llm_events_for_run(&self, _run_id: Uuid) -> Result<Vec<LlmEvent>> {
            Ok(self.events.lock().unwrap().clone())
        }

        async fn tool_events_for_run(&self, _run_id: Uuid) -> Result<Vec<ToolEvent>> {
            Ok(vec![])
        }

        async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
            let mut events = self.events.lock().unwrap();
            let before = events.len();
            events.retain(|e| e.created_at >= cutoff);
            Ok((before - events.len()) as u64)
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn sample_event(created_at: DateTime<Utc>) -> LlmEvent {
        LlmEvent {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
            cost_usd: 0.0,
            latency_ms: 10,
            status: "success".to_string(),
            error_message: None,
            is_fallback: false,
            attempted_providers: vec!["openai".to_string()],
            created_at,
        }
    }

    #[tokio::test]
    async fn cleanup_deletes_only_events_past_retention() {
        let storage: AuditStorageRef = Arc::new(MockStorage::default());
        storage
            .store_llm_event(&sample_event(Utc::now() - Duration::days(2)))
            .await
            .unwrap();
        storage
            .store_llm_event(&sample_event(Utc::now()))
            .await
            .unwrap();

        let manager = AuditRetentionManager::new(storage.clone(), 1);
        let deleted = manager.cleanup().await.unwrap();

        assert_eq!(deleted, 1);
    }

    #[test]
    fn cutoff_date_is_retention_days_in_the_past() {
        let storage: AuditStorageRef = Arc::new(MockStorage::default());
        let manager = AuditRetentionManager::new(storage, 90);
        let cutoff = manager.cutoff_date();
        let expected = Utc::now() - Duration::days(90);
        assert!((cutoff - expected).num_seconds().abs() <= 1);
    }
}
