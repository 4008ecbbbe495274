//! Workflow types and the dispatch seam

use crate::error::Result;
use chrono::{DateTime, Utc};
use conduit_tools::{CallContext, ToolInput, ToolOutput};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Anything that can run a tool by name.
///
/// Implemented by [`super::Orchestrator`]; the communication manager wraps a
/// dispatcher with correlation, retry and circuit breaking.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Execute one tool call
    async fn execute(
        &self,
        ctx: &CallContext,
        tool_name: &str,
        input: ToolInput,
    ) -> Result<ToolOutput>;
}

fn new_workflow_id() -> String {
    Uuid::new_v4().to_string()
}

/// An ordered list of tool calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow identifier
    #[serde(default = "new_workflow_id")]
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Steps, executed in order
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    /// Variables shared with every step as context
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl Workflow {
    /// Create an empty workflow
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_workflow_id(),
            name: name.into(),
            steps: Vec::new(),
            variables: Map::new(),
        }
    }

    /// Append a step
    #[must_use]
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Set a workflow variable
    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Session id taken from the `session_id` variable
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.variables.get("session_id").and_then(Value::as_str)
    }

    pub(crate) fn step_input(&self, step: &WorkflowStep) -> ToolInput {
        let mut context = self.variables.clone();
        context.insert("workflow_id".into(), Value::String(self.id.clone()));
        context.insert("step_name".into(), Value::String(step.name.clone()));

        ToolInput {
            session_id: self.session_id().unwrap_or_default().to_string(),
            data: step.input.clone(),
            context,
        }
    }
}

/// One step of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name
    pub name: String,
    /// Tool to invoke
    pub tool: String,
    /// Tool arguments
    #[serde(default)]
    pub input: Map<String, Value>,
}

impl WorkflowStep {
    /// Create a step with no arguments
    #[must_use]
    pub fn new(name: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tool: tool.into(),
            input: Map::new(),
        }
    }

    /// Set a single argument
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one executed step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step identifier within the workflow run
    pub id: String,
    /// Step name
    pub name: String,
    /// Tool that ran
    pub tool: String,
    /// Whether the step succeeded
    pub success: bool,
    /// Tool output, absent when the call itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ToolOutput>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the step started
    pub started_at: DateTime<Utc>,
    /// Step duration
    pub duration_ms: u64,
}

/// Outcome of a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Workflow identifier
    pub workflow_id: String,
    /// Workflow name
    pub name: String,
    /// True only if every step succeeded
    pub success: bool,
    /// Steps declared by the workflow
    pub total_steps: usize,
    /// Steps that succeeded
    pub successful_steps: usize,
    /// Steps that failed (0 or 1)
    pub failed_steps: usize,
    /// Results of executed steps, in order
    pub step_results: Vec<StepResult>,
    /// Total duration
    pub duration_ms: u64,
    /// First failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
