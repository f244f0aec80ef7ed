// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prompt construction: renders an `llm` step's templated prompt against
//! accumulated run state and assembles the message list a provider expects.

use crate::domain::RunState;
use crate::error::Result;
use crate::providers::Message;
use handlebars::Handlebars;
use serde_json::json;

/// Renders `template` with the run's accumulated step outputs available as
/// `{{steps.<name>.<field>}}` and, when `context` is set on the step, as the
/// top-level `{{context}}` value.
pub fn render_prompt(
    template: &str,
    state: &RunState,
    context: Option<&serde_json::Value>,
) -> Result<String> {
    let handlebars = Handlebars::new();
    let data = json!({
        "steps": state.outputs,
        "context": context,
    });
    Ok(handlebars.render_template(template, &data)?)
}

/// Builds the message list sent to the provider: an optional system message
/// followed by the rendered user prompt.
pub fn build_messages(
    system_prompt: Option<&str>,
    rendered_prompt: String,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system_prompt {
        messages.push(Message::system(system.to_string()));
    }
    messages.push(Message::user(rendered_prompt));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json as j;

    #[test]
    fn renders_prior_step_output() {
        let mut state = RunState::default();
        state.set_output("fetch", j!({"title": "hello world"}));
        let rendered = render_prompt("Summarize: {{steps.fetch.title}}", &state, None).unwrap();
        assert_eq!(rendered, "Summarize: hello world");
    }

    #[test]
    fn renders_inline_context() {
        let state = RunState::default();
        let ctx = j!({"topic": "rust"});
        let rendered = render_prompt("Topic is {{context.topic}}", &state, Some(&ctx)).unwrap();
        assert_eq!(rendered, "Topic is rust");
    }

    #[test]
    fn builds_messages_with_and_without_system_prompt() {
        let messages = build_messages(Some("be terse"), "hi".to_string());
        assert_eq!(messages.len(), 2);
        let messages = build_messages(None, "hi".to_string());
        assert_eq!(messages.len(), 1);
    }
}
