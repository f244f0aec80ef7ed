// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-step-type dispatch: the body of the worker's execution contract.
//! `llm` steps call the gateway, `tool` steps invoke the tool dispatcher,
//! `decision` steps evaluate a predicate against accumulated run state, and
//! `parallel` steps fan their children out concurrently through this same
//! dispatcher.

use crate::error::{Result, WorkerError};
use crate::gateway_client::{CompletionCall, GatewayClient};
use crate::tools::ToolRegistry;
use futures::future::try_join_all;
use relaycore_core::domain::{RunState, StepSpec};
use relaycore_core::prompt::{build_messages, render_prompt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub output_data: serde_json::Value,
    pub tokens_used: i64,
    pub cost_usd: f64,
}

impl StepOutcome {
    fn free(output_data: serde_json::Value) -> Self {
        Self {
            output_data,
            tokens_used: 0,
            cost_usd: 0.0,
        }
    }
}

#[derive(Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub tenant_id: Uuid,
}

#[derive(Clone)]
pub struct StepExecutor {
    gateway: GatewayClient,
    /// Bounds concurrent outbound gateway calls independent of the worker's
    /// overall step concurrency, so one slow provider can't head-of-line
    /// block the rest of an in-flight batch.
    gateway_semaphore: Arc<Semaphore>,
    tools: ToolRegistry,
}

impl StepExecutor {
    pub fn new(gateway: GatewayClient, gateway_concurrency: usize, tools: ToolRegistry) -> Self {
        Self {
            gateway,
            gateway_semaphore: Arc::new(Semaphore::new(gateway_concurrency.max(1))),
            tools,
        }
    }

    pub async fn execute(&self, spec: &StepSpec, state: &RunState, ctx: &StepContext) -> Result<StepOutcome> {
        match spec {
            StepSpec::Llm {
                model,
                system_prompt,
                prompt,
                context,
                max_tokens,
                temperature,
                ..
            } => {
                self.execute_llm(
                    model,
                    system_prompt.as_deref(),
                    prompt,
                    context.as_ref(),
                    *max_tokens,
                    *temperature,
                    state,
                    ctx,
                )
                .await
            }
            StepSpec::Tool {
                tool_name,
                action,
                params,
                ..
            } => self.execute_tool(tool_name, action, params.clone()).await,
            StepSpec::Decision {
                name,
                predicate,
                if_true,
                if_false,
            } => self.execute_decision(name, predicate, if_true, if_false, state),
            StepSpec::Parallel { children, .. } => self.execute_parallel(children, state, ctx).await,
        }
    }

    async fn execute_llm(
        &self,
        model: &str,
        system_prompt: Option<&str>,
        prompt: &str,
        context: Option<&serde_json::Value>,
        max_tokens: Option<u32>,
        temperature: f32,
        state: &RunState,
        ctx: &StepContext,
    ) -> Result<StepOutcome> {
        let rendered = render_prompt(prompt, state, context)
            .map_err(|e| WorkerError::InvalidStepConfig(e.to_string()))?;
        let messages = build_messages(system_prompt, rendered);

        let _permit = self
            .gateway_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("gateway semaphore closed");

        let response = self
            .gateway
            .complete(CompletionCall {
                model: model.to_string(),
                messages,
                tenant_id: ctx.tenant_id,
                run_id: ctx.run_id,
                step_id: ctx.step_id,
                temperature,
                max_tokens,
            })
            .await?;

        Ok(StepOutcome {
            output_data: serde_json::json!({
                "content": response.content,
                "provider": response.provider,
                "is_fallback": response.is_fallback,
                "attempted_providers": response.attempted_providers,
            }),
            tokens_used: response.usage.total_tokens,
            cost_usd: response.cost_usd,
        })
    }

    async fn execute_tool(&self, tool_name: &str, action: &str, params: serde_json::Value) -> Result<StepOutcome> {
        let handler = self
            .tools
            .get(tool_name)
            .ok_or_else(|| WorkerError::UnknownTool(tool_name.to_string()))?;

        let output = handler.execute(action, params).await.map_err(|e| WorkerError::Tool {
            tool: tool_name.to_string(),
            message: e.to_string(),
        })?;

        Ok(StepOutcome::free(output))
    }

    fn execute_decision(
        &self,
        name: &str,
        predicate: &str,
        if_true: &str,
        if_false: &str,
        state: &RunState,
    ) -> Result<StepOutcome> {
        let resolved = state
            .resolve(predicate)
            .ok_or_else(|| WorkerError::UnresolvedPredicate(format!("{name}: {predicate}")))?;
        let branch = if is_truthy(resolved) { if_true } else { if_false };
        Ok(StepOutcome::free(serde_json::json!({ "branch": branch })))
    }

    async fn execute_parallel(
        &self,
        children: &[StepSpec],
        state: &RunState,
        ctx: &StepContext,
    ) -> Result<StepOutcome> {
        // try_join_all preserves input order regardless of completion order,
        // so `results[i]` is always `children[i]`'s outcome.
        let futures = children.iter().map(|child| {
            let this = self.clone();
            let state = state.clone();
            let ctx = ctx.clone();
            let child = child.clone();
            async move {
                this.execute(&child, &state, &ctx)
                    .await
                    .map_err(|e| WorkerError::ChildStepFailed(Box::new(e)))
            }
        });

        let results = try_join_all(futures).await?;

        let mut outputs = Vec::with_capacity(results.len());
        let mut tokens_used = 0;
        let mut cost_usd = 0.0;
        for outcome in results {
            outputs.push(outcome.output_data);
            tokens_used += outcome.tokens_used;
            cost_usd += outcome.cost_usd;
        }

        Ok(StepOutcome {
            output_data: serde_json::Value::Array(outputs),
            tokens_used,
            cost_usd,
        })
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Null => false,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => !s.is_empty() && s != "false",
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore_core::domain::RunState;

    #[test]
    fn truthiness_matches_common_sense() {
        use serde_json::json;
        assert!(is_truthy(&json!(true)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(null)));
        assert!(is_truthy(&json!("yes")));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!(1)));
        assert!(!is_truthy(&json!(0)));
    }

    #[tokio::test]
    async fn decision_step_picks_true_branch() {
        let executor = StepExecutor::new(
            GatewayClient::new("http://localhost:0".to_string()),
            4,
            ToolRegistry::with_defaults(std::time::Duration::from_secs(5)),
        );
        let mut state = RunState::default();
        state.set_output("classify", serde_json::json!({"is_spam": true}));

        let spec = StepSpec::Decision {
            name: "route".to_string(),
            predicate: "classify.is_spam".to_string(),
            if_true: "quarantine".to_string(),
            if_false: "inbox".to_string(),
        };
        let ctx = StepContext {
            run_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
        };

        let outcome = executor.execute(&spec, &state, &ctx).await.unwrap();
        assert_eq!(outcome.output_data, serde_json::json!({"branch": "quarantine"}));
    }

    #[tokio::test]
    async fn tool_step_dispatches_to_echo() {
        let executor = StepExecutor::new(
            GatewayClient::new("http://localhost:0".to_string()),
            4,
            ToolRegistry::with_defaults(std::time::Duration::from_secs(5)),
        );
        let spec = StepSpec::Tool {
            name: "noop".to_string(),
            tool_name: "echo".to_string(),
            action: "noop".to_string(),
            params: serde_json::json!({"hello": "world"}),
        };
        let ctx = StepContext {
            run_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
        };
        let outcome = executor.execute(&spec, &RunState::default(), &ctx).await.unwrap();
        assert_eq!(outcome.output_data, serde_json::json!({"hello": "world"}));
        assert_eq!(outcome.tokens_used, 0);
    }
}
