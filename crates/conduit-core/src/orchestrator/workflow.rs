//! Sequential workflow execution
//!
//! Steps run strictly in order and the run stops at the first failing step.
//! There is no rollback of steps that already succeeded.

use crate::error::{Error, Result};
use crate::event_bus::{payload, EventType};
use crate::utils::Timer;
use chrono::Utc;
use conduit_tools::CallContext;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::core::Orchestrator;
use super::types::{StepResult, Workflow, WorkflowResult};

impl Orchestrator {
    /// Execute a workflow's steps in order, stopping at the first failure.
    ///
    /// A step fails when the call returns an error or when the tool reports
    /// `success: false`.
    #[instrument(skip(self, ctx, workflow), fields(workflow_id = %workflow.id, workflow = %workflow.name))]
    pub async fn execute_workflow(
        &self,
        ctx: &CallContext,
        workflow: &Workflow,
    ) -> Result<WorkflowResult> {
        self.ensure_open()?;
        if workflow.steps.is_empty() {
            return Err(Error::Validation(format!(
                "workflow {} has no steps",
                workflow.name
            )));
        }

        let total_steps = workflow.steps.len();
        info!(total_steps, "Workflow started");
        self.publish(
            EventType::WorkflowStarted,
            workflow,
            json!({
                "workflow_id": workflow.id,
                "name": workflow.name,
                "total_steps": total_steps,
            }),
        );

        let timer = Timer::start();
        let mut step_results = Vec::with_capacity(total_steps);
        let mut failure = None;

        for (index, step) in workflow.steps.iter().enumerate() {
            let started_at = Utc::now();
            let step_timer = Timer::start();
            let outcome = self
                .execute(ctx, &step.tool, workflow.step_input(step))
                .await;

            let (success, output, error) = match outcome {
                Ok(output) => {
                    let error = if output.success {
                        None
                    } else {
                        Some(
                            output
                                .error
                                .clone()
                                .unwrap_or_else(|| "tool reported failure".to_string()),
                        )
                    };
                    (output.success, Some(output), error)
                }
                Err(e) => (false, None, Some(e.to_string())),
            };

            step_results.push(StepResult {
                id: format!("step-{}", index + 1),
                name: step.name.clone(),
                tool: step.tool.clone(),
                success,
                output,
                error: error.clone(),
                started_at,
                duration_ms: step_timer.elapsed_ms(),
            });

            if !success {
                let message = error.unwrap_or_default();
                warn!(step = %step.name, tool = %step.tool, error = %message, "Workflow step failed");
                failure = Some(format!("step {} failed: {}", step.name, message));
                break;
            }
        }

        let failed_steps = usize::from(failure.is_some());
        let result = WorkflowResult {
            workflow_id: workflow.id.clone(),
            name: workflow.name.clone(),
            success: failure.is_none(),
            total_steps,
            successful_steps: step_results.len() - failed_steps,
            failed_steps,
            step_results,
            duration_ms: timer.elapsed_ms(),
            error: failure,
        };

        info!(
            success = result.success,
            successful_steps = result.successful_steps,
            duration_ms = result.duration_ms,
            "Workflow finished"
        );
        self.publish(
            EventType::WorkflowCompleted,
            workflow,
            json!({
                "workflow_id": result.workflow_id,
                "name": result.name,
                "success": result.success,
                "successful_steps": result.successful_steps,
                "failed_steps": result.failed_steps,
                "duration_ms": result.duration_ms,
            }),
        );

        Ok(result)
    }

    fn publish(&self, event_type: EventType, workflow: &Workflow, data: serde_json::Value) {
        if let Some(bus) = &self.event_bus {
            bus.publish_from(
                "orchestrator",
                event_type,
                payload(data),
                workflow.session_id().map(str::to_string),
            );
        }
    }
}
