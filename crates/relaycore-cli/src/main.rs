// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RelayCore CLI: validate a task definition, dry-run it against the local
//! stub provider, or submit it to a running control-plane.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use relaycore_core::domain::{RunState, StepSpec};
use relaycore_core::prompt::{build_messages, render_prompt};
use relaycore_core::providers::LlmProvider;
use relaycore_core::task_graph::TaskGraph;
use relaycore_providers::LocalProvider;
use relaycore_worker::tools::ToolRegistry;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "relaycore")]
#[command(version, about = "RelayCore task inspection and local execution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a task definition: step-order uniqueness, decision branch
    /// resolution, and absence of branch cycles.
    Validate {
        /// Path to a task definition (YAML or JSON, a list of steps)
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Execute a task definition locally against the dependency-free stub
    /// provider and the `echo`/`http` tools, without a queue or database.
    DryRun {
        /// Path to a task definition (YAML or JSON, a list of steps)
        #[arg(value_name = "FILE")]
        file: String,

        /// Inline context JSON made available to step prompts as `{{context}}`
        #[arg(short, long)]
        context: Option<String>,
    },

    /// Submit a run to a running control-plane.
    Submit {
        /// Base URL of the control-plane (e.g. http://127.0.0.1:8082)
        #[arg(long, default_value = "http://127.0.0.1:8082")]
        control_plane_url: String,

        #[arg(long)]
        task_id: Uuid,

        #[arg(long)]
        tenant_id: Uuid,

        #[arg(long)]
        created_by: Uuid,

        /// Token budget override for this run; defaults to the task's own
        #[arg(long)]
        token_budget: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("relaycore={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Validate { file } => validate_task(&file),
        Commands::DryRun { file, context } => dry_run(&file, context.as_deref()).await,
        Commands::Submit {
            control_plane_url,
            task_id,
            tenant_id,
            created_by,
            token_budget,
        } => submit_run(&control_plane_url, task_id, tenant_id, created_by, token_budget).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn read_steps(file_path: &str) -> Result<Vec<StepSpec>> {
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("failed to read task definition: {}", file_path))?;

    let is_json = Path::new(file_path).extension().and_then(|e| e.to_str()) == Some("json");
    if is_json {
        serde_json::from_str(&content).with_context(|| format!("failed to parse task definition JSON: {}", file_path))
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("failed to parse task definition YAML: {}", file_path))
    }
}

fn validate_task(file_path: &str) -> Result<()> {
    info!("validating task definition: {}", file_path);
    println!("{} {}", "Validating task:".cyan().bold(), file_path);

    let steps = read_steps(file_path)?;
    let ordered: Vec<(i32, StepSpec)> = steps.into_iter().enumerate().map(|(i, s)| (i as i32, s)).collect();
    let graph = TaskGraph::build(ordered).with_context(|| "task definition failed validation")?;

    println!("{}", "\u{2713} Task is valid".green().bold());
    println!("  Steps: {}", graph.len());
    for spec in graph.steps_in_order() {
        println!("    - {} ({:?})", spec.name(), spec.step_type());
    }
    Ok(())
}

async fn dry_run(file_path: &str, context: Option<&str>) -> Result<()> {
    info!("dry-running task definition: {}", file_path);
    println!("{} {}", "Dry-running task:".cyan().bold(), file_path);

    let steps = read_steps(file_path)?;
    let ordered: Vec<(i32, StepSpec)> = steps.into_iter().enumerate().map(|(i, s)| (i as i32, s)).collect();
    let graph = TaskGraph::build(ordered).with_context(|| "task definition failed validation")?;

    let context_value: Option<serde_json::Value> = context
        .map(serde_json::from_str)
        .transpose()
        .with_context(|| "failed to parse --context as JSON")?;

    let provider = LocalProvider::new();
    let tools = ToolRegistry::with_defaults(Duration::from_secs(10));
    let mut state = RunState::default();

    let by_name: std::collections::HashMap<&str, &StepSpec> =
        graph.steps_in_order().map(|s| (s.name(), s)).collect();

    let mut current = graph.steps_in_order().next().map(|s| s.name().to_string());
    let mut visited = std::collections::HashSet::new();

    while let Some(name) = current.take() {
        if !visited.insert(name.clone()) {
            anyhow::bail!("decision branches revisited step '{}', aborting dry run", name);
        }
        let spec = *by_name.get(name.as_str()).with_context(|| format!("unknown step '{}'", name))?;

        println!("  {} {}", "->".dimmed(), name.cyan());
        let output = run_step_locally(spec, &context_value, &provider, &tools, &state).await?;
        println!("    {}", serde_json::to_string(&output).unwrap_or_default().dimmed());
        state.set_output(&name, output.clone());

        current = match spec {
            StepSpec::Decision { .. } => output.get("branch").and_then(|v| v.as_str()).map(str::to_string),
            _ => graph
                .steps_in_order()
                .skip_while(|s| s.name() != name)
                .nth(1)
                .map(|s| s.name().to_string()),
        };
    }

    println!("{}", "\u{2713} Dry run completed".green().bold());
    println!("\n{}", "Final state:".cyan().bold());
    println!("{}", serde_json::to_string_pretty(&state.outputs).unwrap_or_default());
    Ok(())
}

async fn run_step_locally(
    spec: &StepSpec,
    context: &Option<serde_json::Value>,
    provider: &LocalProvider,
    tools: &ToolRegistry,
    state: &RunState,
) -> Result<serde_json::Value> {
    match spec {
        StepSpec::Llm {
            model,
            system_prompt,
            prompt,
            context: step_context,
            max_tokens,
            temperature,
            ..
        } => {
            let rendered = render_prompt(prompt, state, step_context.as_ref().or(context.as_ref()))?;
            let messages = build_messages(system_prompt.as_deref(), rendered);
            let request = relaycore_core::providers::CompletionRequest {
                model: model.clone(),
                messages,
                max_tokens: *max_tokens,
                temperature: *temperature,
                top_p: 1.0,
                frequency_penalty: 0.0,
                presence_penalty: 0.0,
                stop: None,
            };
            let response = provider
                .complete(&request)
                .await
                .map_err(|e| anyhow::anyhow!("local provider error: {e}"))?;
            Ok(serde_json::json!({
                "content": response.content,
                "tokens_used": response.usage.total(),
            }))
        }
        StepSpec::Tool { tool_name, action, params, .. } => {
            let handler = tools
                .get(tool_name)
                .ok_or_else(|| anyhow::anyhow!("unknown tool: {}", tool_name))?;
            handler
                .execute(action, params.clone())
                .await
                .map_err(|e| anyhow::anyhow!("tool '{}' error: {e}", tool_name))
        }
        StepSpec::Decision { predicate, if_true, if_false, name } => {
            let resolved = state
                .resolve(predicate)
                .ok_or_else(|| anyhow::anyhow!("decision step '{}': predicate '{}' did not resolve", name, predicate))?;
            let branch = if is_truthy(resolved) { if_true } else { if_false };
            Ok(serde_json::json!({ "branch": branch }))
        }
        StepSpec::Parallel { children, .. } => {
            let mut outputs = Vec::with_capacity(children.len());
            for child in children {
                let output = Box::pin(run_step_locally(child, context, provider, tools, state)).await?;
                outputs.push(output);
            }
            Ok(serde_json::Value::Array(outputs))
        }
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

#[derive(serde::Serialize)]
struct CreateRunRequest {
    task_id: Uuid,
    tenant_id: Uuid,
    created_by: Uuid,
    token_budget: Option<i64>,
}

#[derive(serde::Deserialize)]
struct CreateRunResponse {
    run_id: Uuid,
    status: String,
}

async fn submit_run(
    control_plane_url: &str,
    task_id: Uuid,
    tenant_id: Uuid,
    created_by: Uuid,
    token_budget: Option<i64>,
) -> Result<()> {
    println!("{} {}", "Submitting run to:".cyan().bold(), control_plane_url);

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/internal/runs", control_plane_url))
        .json(&CreateRunRequest { task_id, tenant_id, created_by, token_budget })
        .send()
        .await
        .with_context(|| "failed to reach control-plane")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("control-plane returned {}: {}", status, body);
    }

    let body: CreateRunResponse = response.json().await.with_context(|| "malformed control-plane response")?;
    println!("{}", "\u{2713} Run submitted".green().bold());
    println!("  Run id: {}", body.run_id);
    println!("  Status: {}", body.status);
    Ok(())
}
