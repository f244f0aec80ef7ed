// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Concrete LLM backends for the RelayCore gateway: OpenAI, Anthropic, and a
//! dependency-free local stub for development and tests.

pub mod anthropic;
pub mod local;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use local::LocalProvider;
pub use openai::OpenAiProvider;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
