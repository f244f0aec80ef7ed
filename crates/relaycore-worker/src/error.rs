// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for step execution. `retryable()` decides whether a
//! failed step goes back on the queue for redelivery or straight to the
//! DLQ, per the propagation policy: the worker is the retry authority for
//! step execution, never the gateway's.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("malformed step config: {0}")]
    InvalidStepConfig(String),

    #[error("step timed out")]
    StepTimeout,

    #[error("database error: {0}")]
    Database(String),

    #[error("tool '{tool}' error: {message}")]
    Tool { tool: String, message: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("decision predicate '{0}' did not resolve against run state")]
    UnresolvedPredicate(String),

    #[error("gateway request failed: {0}")]
    GatewayTransport(String),

    #[error("model not supported: {0}")]
    ModelNotSupported(String),

    #[error("tenant budget exceeded, {remaining} tokens remaining")]
    BudgetExceeded { remaining: i64 },

    #[error("tenant rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("all providers failed, attempted: {0:?}")]
    AllProvidersFailed(Vec<String>),

    #[error("child step failed: {0}")]
    ChildStepFailed(Box<WorkerError>),
}

impl WorkerError {
    /// Whether this failure should be retried (leaving the queue message
    /// undelivered so it redelivers after the visibility timeout) rather
    /// than routed straight to the dead-letter sink.
    pub fn retryable(&self) -> bool {
        match self {
            WorkerError::InvalidStepConfig(_) => false,
            WorkerError::StepTimeout => false,
            WorkerError::Database(_) => true,
            WorkerError::Tool { .. } => true,
            WorkerError::UnknownTool(_) => false,
            WorkerError::UnresolvedPredicate(_) => false,
            WorkerError::GatewayTransport(_) => true,
            WorkerError::ModelNotSupported(_) => false,
            WorkerError::BudgetExceeded { .. } => false,
            WorkerError::RateLimited { .. } => true,
            WorkerError::AllProvidersFailed(_) => true,
            WorkerError::ChildStepFailed(inner) => inner.retryable(),
        }
    }

    /// Whether this failure should move the enclosing Run straight to
    /// `budget_exceeded` instead of the generic `failed` state.
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, WorkerError::BudgetExceeded { .. })
    }
}

impl From<relaycore_state::StateError> for WorkerError {
    fn from(e: relaycore_state::StateError) -> Self {
        WorkerError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
