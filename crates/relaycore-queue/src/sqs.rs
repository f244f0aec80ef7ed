// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQS-backed [`StepQueue`]. Visibility timeout and long-poll wait are
//! per-receive-call parameters rather than queue attributes so a worker can
//! tune them from its own configuration without redeploying the queue.

use crate::error::{QueueError, Result};
use crate::message::{DlqReason, ReceivedMessage, StepMessage};
use crate::StepQueue;
use async_trait::async_trait;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use aws_sdk_sqs::Client;

pub struct SqsStepQueue {
    client: Client,
    queue_url: String,
    dlq_url: String,
    visibility_timeout_secs: i32,
}

impl SqsStepQueue {
    pub fn new(client: Client, queue_url: String, dlq_url: String, visibility_timeout_secs: i32) -> Self {
        Self {
            client,
            queue_url,
            dlq_url,
            visibility_timeout_secs,
        }
    }

    pub async fn from_env(queue_url: String, dlq_url: String, visibility_timeout_secs: i32) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);
        Self::new(client, queue_url, dlq_url, visibility_timeout_secs)
    }
}

#[async_trait]
impl StepQueue for SqsStepQueue {
    async fn receive(&self, max_messages: i32, wait_secs: i32) -> Result<Vec<ReceivedMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.clamp(1, 10))
            .wait_time_seconds(wait_secs.clamp(0, 20))
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        let messages = output.messages.unwrap_or_default();
        let mut parsed = Vec::with_capacity(messages.len());
        for msg in messages {
            let receipt_handle = msg
                .receipt_handle
                .ok_or_else(|| QueueError::Transport("message missing receipt handle".into()))?;
            let body_str = msg.body.unwrap_or_default();
            let body: serde_json::Value = serde_json::from_str(&body_str)
                .map_err(|e| QueueError::Transport(format!("malformed message body: {e}")))?;
            let approximate_receive_count = msg
                .attributes
                .as_ref()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|v| v.parse::<i32>().ok())
                .unwrap_or(1);
            parsed.push(ReceivedMessage {
                receipt_handle,
                message_id: msg.message_id,
                approximate_receive_count,
                body,
            });
        }
        Ok(parsed)
    }

    async fn delay_redelivery(&self, receipt_handle: &str, delay_secs: i32) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(delay_secs.clamp(0, 43_200))
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn send(&self, message: &StepMessage) -> Result<()> {
        let body = serde_json::to_string(message)
            .map_err(|e| QueueError::Transport(format!("failed to serialize message: {e}")))?;
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn send_to_dlq(&self, message: &ReceivedMessage, reason: DlqReason) -> Result<()> {
        let mut body = message.body.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("dlq_reason".to_string(), reason.as_str().into());
            obj.insert(
                "original_message_id".to_string(),
                message.message_id.clone().unwrap_or_default().into(),
            );
        }
        let body_str = serde_json::to_string(&body)
            .map_err(|e| QueueError::Transport(format!("failed to serialize DLQ message: {e}")))?;

        self.client
            .send_message()
            .queue_url(&self.dlq_url)
            .message_body(body_str)
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        self.delete(&message.receipt_handle).await
    }
}
