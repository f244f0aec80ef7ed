// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! At-least-once delivery of step-execution messages, with visibility-timeout
//! redelivery and a dead-letter sink for non-retryable or retry-exhausted
//! steps. [`StepQueue`] is the abstraction the worker polls and the
//! control-plane writer enqueues onto; [`SqsStepQueue`] is the production
//! backend.

pub mod error;
pub mod message;
pub mod sqs;

pub use error::{QueueError, Result};
pub use message::{DlqReason, ReceivedMessage, StepMessage};
pub use sqs::SqsStepQueue;

use async_trait::async_trait;

/// The queue contract the worker and control-plane depend on. Implementors
/// must make `receive`/`delete`/`send_to_dlq` at-least-once: a crash between
/// a caller's database write and its call into this trait is safe to replay
/// because step writes are idempotent by `(step_id, attempt)`.
#[async_trait]
pub trait StepQueue: Send + Sync {
    /// Long-polls for up to `max_messages` messages, waiting up to
    /// `wait_secs` for at least one to arrive.
    async fn receive(&self, max_messages: i32, wait_secs: i32) -> Result<Vec<ReceivedMessage>>;

    /// Removes a message after its effects have been durably persisted.
    async fn delete(&self, receipt_handle: &str) -> Result<()>;

    /// Extends a received message's invisibility window so it is not
    /// redelivered for `delay_secs`, realizing the exponential backoff
    /// between retry attempts without deleting and re-sending the message
    /// (which would reset `ApproximateReceiveCount`).
    async fn delay_redelivery(&self, receipt_handle: &str, delay_secs: i32) -> Result<()>;

    /// Enqueues a new step-execution message (the run's first step, or a
    /// successor after the prior step reached `success`).
    async fn send(&self, message: &StepMessage) -> Result<()>;

    /// Moves a received message to the dead-letter sink with a reason,
    /// then removes it from the main queue.
    async fn send_to_dlq(&self, message: &ReceivedMessage, reason: DlqReason) -> Result<()>;
}
