// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background sweep that moves Runs stuck past their Task's
//! `timeout_seconds` into `timeout`, the one Run transition the worker
//! itself never drives (a worker that has wedged can't be trusted to
//! notice its own timeout).

use relaycore_core::domain::RunStatus;
use relaycore_state::{RunRepository, TaskRepository};
use std::time::Duration;

pub struct TimeoutMonitor {
    runs: RunRepository,
    tasks: TaskRepository,
    interval_secs: u64,
    default_timeout_secs: i64,
}

impl TimeoutMonitor {
    pub fn new(runs: RunRepository, tasks: TaskRepository, interval_secs: u64, default_timeout_secs: i64) -> Self {
        Self {
            runs,
            tasks,
            interval_secs,
            default_timeout_secs,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                tracing::warn!(error = %e, "run timeout sweep failed");
            }
        }
    }

    async fn tick(&self) -> anyhow::Result<()> {
        // A Task's timeout_seconds bounds a Run from its own started_at, not
        // a fixed wall-clock cutoff, so this pulls every Run that has been
        // running for at least a second and re-checks each against its own
        // Task's timeout below.
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(1);
        let candidates = self.runs.list_running_older_than(cutoff).await?;

        for run in candidates {
            let timeout_seconds = match self.tasks.get(run.task_id).await {
                Ok(task) if task.timeout_seconds > 0 => task.timeout_seconds,
                _ => self.default_timeout_secs,
            };
            if !crate::routes::runs::is_overdue(&run, timeout_seconds) {
                continue;
            }

            tracing::warn!(run_id = %run.id, timeout_seconds, "run exceeded its timeout, marking timeout");
            if let Err(e) = self
                .runs
                .mark_completed(run.id, RunStatus::Timeout, Some("run exceeded timeout_seconds"))
                .await
            {
                tracing::warn!(run_id = %run.id, error = %e, "failed to mark run as timed out");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::routes::runs::is_overdue;
    use chrono::{Duration, Utc};
    use relaycore_core::domain::{Run, RunStatus};
    use uuid::Uuid;

    fn running_run(started_at: chrono::DateTime<Utc>) -> Run {
        Run {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            created_by: Uuid::new_v4(),
            status: RunStatus::Running,
            token_budget: 1000,
            tokens_used: 0,
            estimated_cost_usd: 0.0,
            started_at: Some(started_at),
            completed_at: None,
            duration_seconds: None,
            current_step: None,
            error_message: None,
        }
    }

    #[test]
    fn a_run_past_its_timeout_is_overdue() {
        let run = running_run(Utc::now() - Duration::seconds(120));
        assert!(is_overdue(&run, 60));
    }

    #[test]
    fn a_run_within_its_timeout_is_not_overdue() {
        let run = running_run(Utc::now() - Duration::seconds(10));
        assert!(!is_overdue(&run, 60));
    }

    #[test]
    fn a_run_that_has_not_started_is_never_overdue() {
        let mut run = running_run(Utc::now());
        run.started_at = None;
        assert!(!is_overdue(&run, 60));
    }
}
