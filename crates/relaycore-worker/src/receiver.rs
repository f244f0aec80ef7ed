// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The poll loop and per-message execution contract: long-poll the queue,
//! dispatch each message through [`StepExecutor`] under a bounded
//! semaphore, and persist the result before acknowledging delivery.
//!
//! Ordering matters for at-least-once safety: a step's effects (the gateway
//! call, the tool invocation) happen before any database write, and the
//! database write happens before the queue message is deleted. A crash
//! between "effects happened" and "message deleted" redelivers the message;
//! idempotent CAS transitions on `(step_id, attempt)` make that replay safe
//! rather than a double-execution.

use crate::config::Config;
use crate::error::WorkerError;
use crate::executor::{StepContext, StepExecutor};
use relaycore_audit::storage::AuditStorageRef;
use relaycore_core::domain::{
    Run, RunState, RunStatus, Step, StepSpec, StepStatus, StepType, ToolEvent,
};
use relaycore_queue::{DlqReason, ReceivedMessage, StepMessage, StepQueue};
use relaycore_state::{RunRepository, StepRepository, TaskRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

pub struct Worker {
    queue: Arc<dyn StepQueue>,
    runs: RunRepository,
    steps: StepRepository,
    tasks: TaskRepository,
    audit: AuditStorageRef,
    executor: StepExecutor,
    config: Config,
    dispatch: Arc<Semaphore>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn StepQueue>,
        runs: RunRepository,
        steps: StepRepository,
        tasks: TaskRepository,
        audit: AuditStorageRef,
        executor: StepExecutor,
        config: Config,
    ) -> Self {
        let dispatch = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            queue,
            runs,
            steps,
            tasks,
            audit,
            executor,
            config,
            dispatch,
        }
    }

    /// Runs forever: long-polls for messages, dispatches each onto a task
    /// bounded by `concurrency`, and backs off briefly on an empty poll or a
    /// transport error so a down queue doesn't spin the process hot.
    pub async fn run(self: Arc<Self>) {
        loop {
            let received = self
                .queue
                .receive(self.config.queue_max_messages, self.config.queue_wait_secs)
                .await;

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(error = %e, "queue receive failed, backing off");
                    tokio::time::sleep(Duration::from_secs(self.config.empty_poll_backoff_secs)).await;
                    continue;
                }
            };

            if messages.is_empty() {
                tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
                continue;
            }

            for message in messages {
                let worker = Arc::clone(&self);
                let permit = Arc::clone(&self.dispatch)
                    .acquire_owned()
                    .await
                    .expect("dispatch semaphore closed");
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = worker.process_message(message).await {
                        tracing::error!(error = %e, "step processing failed");
                    }
                });
            }
        }
    }

    async fn process_message(&self, received: ReceivedMessage) -> Result<(), WorkerError> {
        let message = match received.parse() {
            Ok(m) => m,
            Err(_missing) => {
                self.queue
                    .send_to_dlq(&received, DlqReason::MissingRequiredFields)
                    .await
                    .map_err(|e| WorkerError::GatewayTransport(e.to_string()))?;
                return Ok(());
            }
        };

        let run = self.runs.get(message.run_id).await?;
        if run.status.is_terminal() {
            self.queue.delete(&received.receipt_handle).await.ok();
            return Ok(());
        }

        let step = self.steps.get(message.step_id).await?;
        if step.status.is_terminal() {
            // Already recorded by a prior delivery of this same message.
            self.queue.delete(&received.receipt_handle).await.ok();
            return Ok(());
        }

        let attempt = received.approximate_receive_count;
        if attempt > step.max_attempts {
            self.steps
                .record_result(step.id, StepStatus::Failed, None, Some("retries exhausted"), 0, 0.0)
                .await?;
            self.runs
                .mark_completed(run.id, RunStatus::Failed, Some("retries exhausted"))
                .await?;
            self.queue.send_to_dlq(&received, DlqReason::RetriesExhausted).await.ok();
            return Ok(());
        }

        let spec = message
            .to_step_spec()
            .map_err(|e| WorkerError::InvalidStepConfig(e.to_string()))?;

        let state = self.build_run_state(run.id).await?;
        self.steps.mark_running(step.id, attempt).await?;

        let ctx = StepContext {
            run_id: run.id,
            step_id: step.id,
            tenant_id: run.tenant_id,
        };

        let started = std::time::Instant::now();
        let timeout = Duration::from_secs(self.config.step_default_timeout_secs);
        let outcome = tokio::time::timeout(timeout, self.executor.execute(&spec, &state, &ctx)).await;

        match outcome {
            Ok(Ok(outcome)) => {
                self.steps
                    .record_result(step.id, StepStatus::Success, Some(outcome.output_data.clone()), None, outcome.tokens_used, outcome.cost_usd)
                    .await?;
                self.runs.add_tokens_used(run.id, outcome.tokens_used, outcome.cost_usd).await?;
                self.runs.set_current_step(run.id, &step.step_name).await?;

                if matches!(spec.step_type(), StepType::Tool) {
                    self.record_tool_event(&run, &step, &spec, &outcome.output_data, started, None).await;
                }

                self.advance(&run, &step, &spec, &outcome.output_data).await?;
                self.queue.delete(&received.receipt_handle).await.ok();
                Ok(())
            }
            Ok(Err(err)) => {
                if matches!(spec.step_type(), StepType::Tool) {
                    self.record_tool_event(&run, &step, &spec, &serde_json::Value::Null, started, Some(err.to_string()))
                        .await;
                }
                self.handle_failure(&received, &run, &step, attempt, err).await
            }
            Err(_elapsed) => self.handle_failure(&received, &run, &step, attempt, WorkerError::StepTimeout).await,
        }
    }

    async fn build_run_state(&self, run_id: Uuid) -> Result<RunState, WorkerError> {
        let mut state = RunState::default();
        for prior in self.steps.list_by_run(run_id).await? {
            if prior.status == StepStatus::Success {
                if let Some(output) = prior.output_data {
                    state.set_output(&prior.step_name, output);
                }
            }
        }
        Ok(state)
    }

    async fn record_tool_event(
        &self,
        run: &Run,
        step: &Step,
        spec: &StepSpec,
        output: &serde_json::Value,
        started: std::time::Instant,
        error_message: Option<String>,
    ) {
        let (tool_name, action, params) = match spec {
            StepSpec::Tool { tool_name, action, params, .. } => (tool_name.clone(), action.clone(), params.clone()),
            _ => return,
        };
        let event = ToolEvent {
            id: Uuid::new_v4(),
            run_id: run.id,
            step_id: step.id,
            tenant_id: run.tenant_id,
            tool_name,
            tool_action: action,
            input_params: params,
            output_data: if output.is_null() { None } else { Some(output.clone()) },
            duration_seconds: started.elapsed().as_secs() as i64,
            status: if error_message.is_some() { "failed".to_string() } else { "success".to_string() },
            error_message,
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = self.audit.store_tool_event(&event).await {
            tracing::warn!(error = %e, step_id = %step.id, "failed to persist tool event");
        }
    }

    /// Determines the successor of a completed step and enqueues it, or
    /// marks the run `completed` if there is none. A `decision` step names
    /// its successor by branch; every other step type advances by
    /// `step_order`.
    async fn advance(&self, run: &Run, step: &Step, spec: &StepSpec, output: &serde_json::Value) -> Result<(), WorkerError> {
        let task = self.tasks.get(run.task_id).await?;

        let next_spec = if let StepSpec::Decision { .. } = spec {
            let branch = output.get("branch").and_then(|v| v.as_str()).unwrap_or_default();
            task.task_config.iter().find(|s| s.name() == branch).cloned()
        } else {
            task.task_config
                .iter()
                .enumerate()
                .find(|(i, _)| *i as i32 == step.step_order + 1)
                .map(|(_, s)| s.clone())
        };

        match next_spec {
            Some(next_spec) => {
                let next_step_order = task
                    .task_config
                    .iter()
                    .position(|s| s.name() == next_spec.name())
                    .unwrap_or((step.step_order + 1) as usize) as i32;

                let next_step_id = Uuid::new_v4();
                let next_step = Step {
                    id: next_step_id,
                    run_id: run.id,
                    step_name: next_spec.name().to_string(),
                    step_type: next_spec.step_type(),
                    step_order: next_step_order,
                    status: StepStatus::Queued,
                    attempt_number: 0,
                    max_attempts: task.max_retries.max(1),
                    input_data: serde_json::to_value(&next_spec).unwrap_or_default(),
                    output_data: None,
                    error_message: None,
                    tokens_used: 0,
                    cost_usd: 0.0,
                    started_at: None,
                    completed_at: None,
                };
                self.steps.create(&next_step).await?;

                let message = StepMessage::for_spec(run.id, next_step_id, &next_spec)
                    .map_err(|e| WorkerError::InvalidStepConfig(e.to_string()))?;
                self.queue
                    .send(&message)
                    .await
                    .map_err(|e| WorkerError::GatewayTransport(e.to_string()))?;
                Ok(())
            }
            None => {
                self.runs.mark_completed(run.id, RunStatus::Completed, None).await?;
                Ok(())
            }
        }
    }

    async fn handle_failure(
        &self,
        received: &ReceivedMessage,
        run: &Run,
        step: &Step,
        attempt: i32,
        err: WorkerError,
    ) -> Result<(), WorkerError> {
        let message = err.to_string();

        if err.is_budget_exceeded() {
            self.steps
                .record_result(step.id, StepStatus::Failed, None, Some(&message), 0, 0.0)
                .await?;
            self.runs.mark_completed(run.id, RunStatus::BudgetExceeded, Some(&message)).await?;
            self.queue.send_to_dlq(received, DlqReason::NonRetryableError).await.ok();
            return Ok(());
        }

        if err.retryable() && attempt < step.max_attempts {
            self.steps.mark_retrying(step.id, &message).await?;
            let backoff = retry_backoff_secs(
                attempt,
                self.config.step_retry_base_secs,
                self.config.step_retry_max_secs,
            );
            self.queue
                .delay_redelivery(&received.receipt_handle, backoff as i32)
                .await
                .map_err(|e| WorkerError::GatewayTransport(e.to_string()))?;
            return Ok(());
        }

        self.steps
            .record_result(step.id, StepStatus::Failed, None, Some(&message), 0, 0.0)
            .await?;
        self.runs.mark_completed(run.id, RunStatus::Failed, Some(&message)).await?;

        let reason = if matches!(err, WorkerError::StepTimeout) {
            DlqReason::StepTimeout
        } else if !err.retryable() {
            DlqReason::NonRetryableError
        } else {
            DlqReason::RetriesExhausted
        };
        self.queue.send_to_dlq(received, reason).await.ok();
        Ok(())
    }
}

/// `min(retry_max, retry_base * 2^(attempt-1))`.
fn retry_backoff_secs(attempt: i32, base: u64, max: u64) -> u64 {
    let exponent = (attempt - 1).max(0) as u32;
    base.saturating_mul(1u64 << exponent.min(32)).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(retry_backoff_secs(1, 2, 60), 2);
        assert_eq!(retry_backoff_secs(2, 2, 60), 4);
        assert_eq!(retry_backoff_secs(3, 2, 60), 8);
        assert_eq!(retry_backoff_secs(10, 2, 60), 60);
    }
}
