// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only storage for LLM and tool invocation events: the source of
//! truth for cost attribution and provider health analytics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaycore_core::domain::{LlmEvent, ToolEvent};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("event not found: {0}")]
    NotFound(Uuid),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait AuditStorage: Send + Sync {
    async fn store_llm_event(&self, event: &LlmEvent) -> Result<()>;
    async fn store_tool_event(&self, event: &ToolEvent) -> Result<()>;
    async fn llm_events_for_run(&self, run_id: Uuid) -> Result<Vec<LlmEvent>>;
    async fn tool_events_for_run(&self, run_id: Uuid) -> Result<Vec<ToolEvent>>;
    /// Deletes events older than `cutoff`, returning the number removed
    /// across both tables.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    async fn health_check(&self) -> Result<()>;
}

pub type AuditStorageRef = Arc<dyn AuditStorage>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockStorage {
        llm_events: Mutex<Vec<LlmEvent>>,
    }

    #[async_trait]
    impl AuditStorage for MockStorage {
        async fn store_llm_event(&self, event: &LlmEvent) -> Result<()> {
            self.llm_events.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn store_tool_event(&self, _event: &ToolEvent) -> Result<()> {
            Ok(())
        }

        async fn llm_events_for_run(&self, run_id: Uuid) -> Result<Vec<LlmEvent>> {
            Ok(self
                .llm_events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.run_id == run_id)
                .cloned()
                .collect())
        }

        async fn tool_events_for_run(&self, _run_id: Uuid) -> Result<Vec<ToolEvent>> {
            Ok(vec![])
        }

        async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn mock_storage_round_trips_an_event() {
        let storage: AuditStorageRef = Arc::new(MockStorage::default());
        let run_id = Uuid::new_v4();
        let event = LlmEvent {
            id: Uuid::new_v4(),
            run_id,
            step_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cost_usd: 0.001,
            latency_ms: 250,
            status: "success".to_string(),
            error_message: None,
            is_fallback: false,
            attempted_providers: vec!["openai".to_string()],
            created_at: Utc::now(),
        };

        storage.store_llm_event(&event).await.unwrap();
        let events = storage.llm_events_for_run(run_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event.id);
    }
}
