//! Orchestrator - synchronous tool dispatch and workflow sequencing
//!
//! # Module Structure
//!
//! - `config`: `OrchestratorConfig`
//! - `core`: `Orchestrator` struct, single-call dispatch and health
//! - `workflow`: sequential multi-step execution
//! - `types`: workflow types and the `ToolDispatcher` seam

mod config;
mod core;
mod types;
mod workflow;


pub use config::OrchestratorConfig;
pub use core::Orchestrator;
#[cfg(test)]
pub use types::MockToolDispatcher;
pub use types::{StepResult, ToolDispatcher, Workflow, WorkflowResult, WorkflowStep};
