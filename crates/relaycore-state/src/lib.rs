// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Postgres-backed persistence for Tenants, Tasks, Runs, and Steps.

pub mod error;
pub mod pool;
pub mod repository;

pub use error::{Result, StateError};
pub use pool::{connect, migrate};
pub use repository::{RunRepository, StepRepository, TaskRepository, TenantRepository};
