// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("database error: {0}")]
    Database(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("tenant not found: {0}")]
    TenantNotFound(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("step not found: {0}")]
    StepNotFound(Uuid),

    /// A compare-and-set status transition didn't match the expected
    /// current value; another worker already moved it.
    #[error("status transition conflict on {entity} {id}: expected {expected}")]
    TransitionConflict {
        entity: &'static str,
        id: Uuid,
        expected: String,
    },
}

impl From<sqlx::Error> for StateError {
    fn from(err: sqlx::Error) -> Self {
        StateError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StateError>;
