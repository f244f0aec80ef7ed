// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only storage for LLM and tool invocation events, plus the
//! background job that enforces retention.

pub mod database;
pub mod retention;
pub mod storage;

pub use database::DatabaseAuditStorage;
pub use retention::AuditRetentionManager;
pub use storage::{AuditStorage, AuditStorageRef, Result, StorageError};
