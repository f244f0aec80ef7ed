// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("message missing required field(s): {0:?}")]
    MissingFields(Vec<&'static str>),
}

pub type Result<T> = std::result::Result<T, QueueError>;
