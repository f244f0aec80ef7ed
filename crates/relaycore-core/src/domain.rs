// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: Apache-2.0

//! Core domain model: Tenants, Tasks, Runs, Steps, and the step-level state
//! machine that the worker drives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A billing and isolation boundary. Every Task, Run, and LLM call belongs to
/// exactly one tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub token_budget_monthly: i64,
    pub token_used_current_month: i64,
    pub rate_limit_per_minute: i32,
    pub status: TenantStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
}

/// The type of a step and its type-specific configuration, as authored in a
/// Task's `task_config`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepSpec {
    Llm {
        name: String,
        model: String,
        #[serde(default)]
        system_prompt: Option<String>,
        prompt: String,
        #[serde(default)]
        context: Option<serde_json::Value>,
        #[serde(default)]
        max_tokens: Option<u32>,
        #[serde(default = "default_temperature")]
        temperature: f32,
    },
    Tool {
        name: String,
        tool_name: String,
        action: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    Decision {
        name: String,
        /// Field path into accumulated run state, compared for truthiness.
        predicate: String,
        if_true: String,
        if_false: String,
    },
    Parallel {
        name: String,
        children: Vec<StepSpec>,
    },
}

fn default_temperature() -> f32 {
    0.7
}

impl StepSpec {
    pub fn name(&self) -> &str {
        match self {
            StepSpec::Llm { name, .. } => name,
            StepSpec::Tool { name, .. } => name,
            StepSpec::Decision { name, .. } => name,
            StepSpec::Parallel { name, .. } => name,
        }
    }

    pub fn step_type(&self) -> StepType {
        match self {
            StepSpec::Llm { .. } => StepType::Llm,
            StepSpec::Tool { .. } => StepType::Tool,
            StepSpec::Decision { .. } => StepType::Decision,
            StepSpec::Parallel { .. } => StepType::Parallel,
        }
    }
}

/// An ordered task definition. Immutable once created; a new version is a
/// new row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub task_config: Vec<StepSpec>,
    pub default_token_budget: i64,
    pub timeout_seconds: i64,
    pub max_retries: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    BudgetExceeded,
}

impl RunStatus {
    /// Terminal states are absorbing: no transition leaves them except an
    /// administrative delete.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Failed
                | RunStatus::Cancelled
                | RunStatus::Timeout
                | RunStatus::BudgetExceeded
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: Uuid,
    pub task_id: Uuid,
    pub tenant_id: Uuid,
    pub created_by: Uuid,
    pub status: RunStatus,
    pub token_budget: i64,
    pub tokens_used: i64,
    pub estimated_cost_usd: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub current_step: Option<String>,
    pub error_message: Option<String>,
}

impl Run {
    /// `tokens_used <= token_budget + delta`, where delta is the in-flight
    /// estimation slack bounded by one concurrent request per client.
    pub fn is_within_budget(&self, delta: i64) -> bool {
        self.tokens_used <= self.token_budget + delta
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Llm,
    Tool,
    Decision,
    Parallel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Queued,
    Running,
    Success,
    Failed,
    Retrying,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_name: String,
    pub step_type: StepType,
    pub step_order: i32,
    pub status: StepStatus,
    pub attempt_number: i32,
    pub max_attempts: i32,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(s), Some(c)) => Some((c - s).num_seconds().max(0)),
            _ => None,
        }
    }
}

/// Append-only audit row for a single LLM call, the source of truth for
/// cost attribution and provider health analytics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmEvent {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub tenant_id: Uuid,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    pub latency_ms: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub is_fallback: bool,
    pub attempted_providers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit row for a single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolEvent {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub tenant_id: Uuid,
    pub tool_name: String,
    pub tool_action: String,
    pub input_params: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub duration_seconds: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Accumulated outputs of previously completed steps in a run, keyed by step
/// name. Used for decision-step predicate evaluation and `{{context}}`
/// prompt interpolation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub outputs: HashMap<String, serde_json::Value>,
}

impl RunState {
    pub fn set_output(&mut self, step_name: &str, value: serde_json::Value) {
        self.outputs.insert(step_name.to_string(), value);
    }

    /// Resolves a dotted field path (`step.field.nested`) against the
    /// accumulated outputs.
    pub fn resolve(&self, path: &str) -> Option<&serde_json::Value> {
        let mut parts = path.split('.');
        let root = parts.next()?;
        let mut current = self.outputs.get(root)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }
}
