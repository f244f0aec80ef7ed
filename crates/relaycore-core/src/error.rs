// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: Apache-2.0

//! Shared error taxonomy for the orchestration core.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or executing a run's step graph.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Referenced step does not exist in the task.
    #[error("step not found: {0}")]
    StepNotFound(String),

    /// A step's declared `step_order` collides with another step.
    #[error("duplicate step_order {order} in task (steps {first} and {second})")]
    DuplicateStepOrder {
        order: i32,
        first: String,
        second: String,
    },

    /// A `parallel` step's children form a cycle or reference an unknown step.
    #[error("invalid step graph: {0}")]
    InvalidStepGraph(String),

    /// Step configuration doesn't match what `step_type` expects.
    #[error("invalid config for step {step_id}: {reason}")]
    InvalidStepConfig { step_id: String, reason: String },

    /// A step ran longer than its configured timeout.
    #[error("step timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Template rendering (prompt construction) failed.
    #[error("template error: {0}")]
    Template(#[from] handlebars::RenderError),

    /// Catch-all for conditions that don't warrant a dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
