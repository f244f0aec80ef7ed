// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire format for step-execution messages.

use relaycore_core::domain::{StepSpec, StepType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The queue payload the control-plane writer enqueues and the worker
/// consumes. `step_config` may be `{}` but every other field is required;
/// a message missing one of them is not retryable (see
/// [`crate::error::QueueError::MissingField`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMessage {
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub step_name: String,
    pub step_type: StepType,
    #[serde(default)]
    pub step_config: serde_json::Value,
    #[serde(default = "default_attempt")]
    pub attempt: i32,
}

fn default_attempt() -> i32 {
    1
}

impl StepMessage {
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    /// Builds the envelope for enqueuing `spec` as the step identified by
    /// `step_id`/`run_id`. `step_config` carries every type-specific field
    /// except `name`/`type`, which travel as `step_name`/`step_type` so the
    /// worker can rebuild a full [`StepSpec`] without a Task lookup.
    pub fn for_spec(run_id: Uuid, step_id: Uuid, spec: &StepSpec) -> serde_json::Result<Self> {
        let mut config = serde_json::to_value(spec)?;
        let step_type = spec.step_type();
        if let Some(obj) = config.as_object_mut() {
            obj.remove("type");
            obj.remove("name");
        }
        Ok(Self {
            run_id,
            step_id,
            step_name: spec.name().to_string(),
            step_type,
            step_config: config,
            attempt: 1,
        })
    }

    /// Reconstructs the full [`StepSpec`] this message describes by
    /// re-tagging `step_config` with `type`/`name`, the inverse of
    /// [`StepMessage::for_spec`].
    pub fn to_step_spec(&self) -> serde_json::Result<StepSpec> {
        let mut value = self.step_config.clone();
        if !value.is_object() {
            value = serde_json::json!({});
        }
        let obj = value.as_object_mut().expect("forced to object above");
        obj.insert("type".to_string(), serde_json::to_value(self.step_type)?);
        obj.insert("name".to_string(), serde_json::Value::String(self.step_name.clone()));
        serde_json::from_value(value)
    }
}

/// An envelope received from the queue, carrying the provider-assigned
/// receipt handle needed to delete or redeliver it, and the delivery count
/// SQS tracks natively (used as the step's attempt number instead of a
/// value baked into the message body, so redelivery doesn't require
/// rewriting it).
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub receipt_handle: String,
    pub message_id: Option<String>,
    pub approximate_receive_count: i32,
    pub body: serde_json::Value,
}

impl ReceivedMessage {
    /// Parses the body as a [`StepMessage`], reporting which required key
    /// is missing rather than a generic deserialization failure so the
    /// caller can route it to the DLQ with `reason="missing_required_fields"`.
    pub fn parse(&self) -> Result<StepMessage, Vec<&'static str>> {
        let obj = self.body.as_object();
        let mut missing = Vec::new();
        for key in ["run_id", "step_id", "step_name", "step_type"] {
            let present = obj.map(|o| o.contains_key(key)).unwrap_or(false);
            if !present {
                missing.push(key);
            }
        }
        if !missing.is_empty() {
            return Err(missing);
        }
        serde_json::from_value(self.body.clone()).map_err(|_| vec!["step_type"])
    }
}

/// Reason a message was routed to the dead-letter sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqReason {
    MissingRequiredFields,
    RetriesExhausted,
    StepTimeout,
    NonRetryableError,
}

impl DlqReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DlqReason::MissingRequiredFields => "missing_required_fields",
            DlqReason::RetriesExhausted => "retries_exhausted",
            DlqReason::StepTimeout => "step_timeout",
            DlqReason::NonRetryableError => "non_retryable_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_reports_missing_keys() {
        let msg = ReceivedMessage {
            receipt_handle: "r1".into(),
            message_id: Some("m1".into()),
            approximate_receive_count: 1,
            body: json!({"run_id": Uuid::new_v4(), "step_name": "x"}),
        };
        let missing = msg.parse().unwrap_err();
        assert!(missing.contains(&"step_id"));
        assert!(missing.contains(&"step_type"));
    }

    #[test]
    fn parse_defaults_step_config_and_attempt() {
        let msg = ReceivedMessage {
            receipt_handle: "r1".into(),
            message_id: None,
            approximate_receive_count: 1,
            body: json!({
                "run_id": Uuid::new_v4(),
                "step_id": Uuid::new_v4(),
                "step_name": "fetch",
                "step_type": "llm",
            }),
        };
        let parsed = msg.parse().unwrap();
        assert_eq!(parsed.attempt, 1);
        assert_eq!(parsed.step_config, serde_json::json!({}));
    }

    #[test]
    fn for_spec_round_trips_through_to_step_spec() {
        let spec = StepSpec::Llm {
            name: "summarize".to_string(),
            model: "gpt-4".to_string(),
            system_prompt: Some("be terse".to_string()),
            prompt: "Summarize: {{context}}".to_string(),
            context: None,
            max_tokens: Some(256),
            temperature: 0.2,
        };
        let message = StepMessage::for_spec(Uuid::new_v4(), Uuid::new_v4(), &spec).unwrap();
        assert_eq!(message.step_name, "summarize");
        assert_eq!(message.step_type, StepType::Llm);

        let rebuilt = message.to_step_spec().unwrap();
        assert_eq!(rebuilt, spec);
    }
}
