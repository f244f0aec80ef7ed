// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orchestrator worker: consumes step-execution messages from the queue,
//! drives the per-step execution contract (LLM call, tool invocation,
//! decision, or parallel fan-out), and persists run/step progress.

pub mod config;
pub mod error;
pub mod executor;
pub mod gateway_client;
pub mod receiver;
pub mod tools;

pub use config::Config;
pub use error::{Result, WorkerError};
pub use executor::{StepContext, StepExecutor, StepOutcome};
pub use gateway_client::GatewayClient;
pub use receiver::Worker;
pub use tools::ToolRegistry;
