//! Job Orchestrator - asynchronous jobs on a bounded queue and worker pool
//!
//! Submission never blocks. A full queue fails the job immediately instead
//! of applying back-pressure to the caller.

mod engine;
mod types;

#[cfg(test)]
mod tests;

pub use engine::JobOrchestrator;
pub use types::{Job, JobHandler, JobOrchestratorConfig, JobStatus, JobType, OrchestratorStats};
