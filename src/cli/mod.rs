//! CLI module for Conduit
//!
//! Provides commands:
//! - `tools`: List registered tools
//! - `run`: Execute a workflow file through the orchestrator
//! - `call`: Send one request through the communication manager
//! - `health`: Print component health and stats

use crate::engine::Engine;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use conduit_core::{ToolRequest, Workflow};
use conduit_tools::CallContext;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Conduit execution core CLI
#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(about = "Resilient tool execution core")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered tools
    Tools,
    /// Execute a workflow from a JSON file
    Run {
        /// Path to the workflow JSON
        workflow: PathBuf,
    },
    /// Call a single tool with retries and circuit breaking
    Call {
        /// Tool name
        tool: String,
        /// JSON object passed as the tool's input data
        #[arg(long, default_value = "{}")]
        data: String,
        /// Session to attribute the call to
        #[arg(long, default_value = "cli")]
        session: String,
        /// Overall deadline in milliseconds, retries included
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print orchestrator health and job/event stats
    Health,
}

/// Run the CLI command
pub async fn run(cli: Cli, engine: &Engine) -> Result<()> {
    match cli.command {
        Some(Commands::Tools) => list_tools(engine),
        Some(Commands::Run { workflow }) => run_workflow(engine, &workflow).await,
        Some(Commands::Call {
            tool,
            data,
            session,
            timeout_ms,
        }) => call_tool(engine, tool, &data, session, timeout_ms).await,
        Some(Commands::Health) => print_json(&json!({
            "orchestrator": engine.orchestrator.health(),
            "jobs": engine.jobs.get_stats(),
            "event_bus": engine.event_bus.stats(),
            "breakers": engine.communication.breakers(),
        })),
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn list_tools(engine: &Engine) -> Result<()> {
    let mut definitions = engine.orchestrator.list_definitions();
    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    for definition in definitions {
        println!("{:<12} {}", definition.name, definition.description);
    }
    Ok(())
}

async fn run_workflow(engine: &Engine, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read workflow {}", path.display()))?;
    let workflow: Workflow = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid workflow JSON in {}", path.display()))?;

    let result = engine
        .orchestrator
        .execute_workflow(&CallContext::new(), &workflow)
        .await
        .context("Workflow execution failed")?;
    print_json(&result)
}

async fn call_tool(
    engine: &Engine,
    tool: String,
    data: &str,
    session: String,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let parameters = parse_data(data)?;
    let mut request = ToolRequest::new(tool)
        .with_session(session)
        .with_parameters(parameters);
    if let Some(ms) = timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }

    let response = engine
        .communication
        .send_request(&CallContext::new(), request)
        .await
        .context("Tool request failed")?;
    print_json(&response)
}

fn parse_data(data: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(data).context("--data must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--data must be a JSON object, got {other}"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_object() {
        let map = parse_data(r#"{"duration_ms": 10}"#).unwrap();
        assert_eq!(map["duration_ms"], 10);
    }

    #[test]
    fn test_parse_data_rejects_non_objects() {
        assert!(parse_data("[1, 2]").is_err());
        assert!(parse_data("not json").is_err());
    }

    #[test]
    fn test_cli_parses_call() {
        let cli = Cli::parse_from(["conduit", "call", "echo", "--data", r#"{"a":1}"#]);
        match cli.command {
            Some(Commands::Call { tool, data, .. }) => {
                assert_eq!(tool, "echo");
                assert_eq!(data, r#"{"a":1}"#);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
