// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tool dispatch boundary. The worker holds a registry of named handlers
//! behind one capability trait; production deployments swap in sandboxed
//! browser/code-runner tools behind the same trait without changing the
//! scheduling contract above it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, action: &str, params: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Name-keyed registry of tool handlers, looked up by a step's `tool_name`.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// The registry shipped with the core: `http` for bounded outbound calls
    /// and `echo` for workflow-wiring tests.
    pub fn with_defaults(http_timeout: Duration) -> Self {
        let mut registry = Self::new();
        registry.register("http", Arc::new(HttpTool::new(http_timeout)));
        registry.register("echo", Arc::new(EchoTool));
        registry
    }
}

/// Returns its input params unchanged. Used to exercise the scheduler and
/// step state machine without depending on any external service.
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn execute(&self, _action: &str, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        Ok(params)
    }
}

/// A bounded outbound HTTP call. `action` selects the method (`get`/`post`);
/// `params` carries `{url, headers?, body?}`.
pub struct HttpTool {
    client: reqwest::Client,
}

impl HttpTool {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP tool client");
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for HttpTool {
    async fn execute(&self, action: &str, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let url = params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::Message("http tool requires a 'url' param".to_string()))?;

        let mut request = match action.to_ascii_lowercase().as_str() {
            "get" => self.client.get(url),
            "post" => self.client.post(url),
            other => return Err(ToolError::Message(format!("unsupported http action '{other}'"))),
        };

        if let Some(headers) = params.get("headers").and_then(|v| v.as_object()) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }
        if let Some(body) = params.get("body") {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Message(format!("http request failed: {e}")))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Message(format!("failed to read http response body: {e}")))?;
        let body = serde_json::from_str::<serde_json::Value>(&text).unwrap_or(serde_json::Value::String(text));

        Ok(serde_json::json!({ "status": status, "body": body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_its_input() {
        let tool = EchoTool;
        let params = serde_json::json!({"a": 1});
        let result = tool.execute("noop", params.clone()).await.unwrap();
        assert_eq!(result, params);
    }

    #[test]
    fn default_registry_has_http_and_echo() {
        let registry = ToolRegistry::with_defaults(Duration::from_secs(5));
        assert!(registry.get("http").is_some());
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }
}
