//! Job types

use crate::error::Result;
use chrono::{DateTime, Utc};
use conduit_tools::CallContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// Kind of work a job performs. Handlers are registered per type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    /// Repository analysis
    Analysis,
    /// Image build
    Build,
    /// Deployment
    Deploy,
    /// Anything else, by name
    Custom(String),
}

impl JobType {
    /// Lowercase wire name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Analysis => "analysis",
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for JobType {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "analysis" => Self::Analysis,
            "build" => Self::Build,
            "deploy" => Self::Deploy,
            _ => Self::Custom(value),
        }
    }
}

impl From<&str> for JobType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<JobType> for String {
    fn from(value: JobType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue
    Pending,
    /// Picked up by a worker
    Running,
    /// Handler returned a result
    Completed,
    /// Handler failed, panicked, or the queue was full
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl JobStatus {
    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving to `next` is a legal transition
    #[must_use]
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Failed | Self::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of asynchronous work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier
    pub id: String,
    /// Job type
    pub job_type: JobType,
    /// Current status
    pub status: JobStatus,
    /// Handler parameters
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Handler result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// When a worker picked the job up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job with a fresh id
    #[must_use]
    pub fn new(job_type: impl Into<JobType>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            status: JobStatus::Pending,
            parameters: Map::new(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Set a parameter
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Replace the parameter map
    #[must_use]
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Move to `next` if the transition is legal, stamping timestamps
    pub(crate) fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            JobStatus::Pending => {}
        }
        true
    }
}

/// Executes jobs of one type.
///
/// Cancellation is cooperative: handlers should watch `ctx` and return early
/// when it fires.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job and return its result
    async fn handle(&self, ctx: &CallContext, job: &Job) -> Result<Option<Value>>;
}

/// Job counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    /// All retained jobs
    pub total: usize,
    /// Pending jobs
    pub pending: usize,
    /// Running jobs
    pub running: usize,
    /// Completed jobs
    pub completed: usize,
    /// Failed jobs
    pub failed: usize,
    /// Cancelled jobs
    pub cancelled: usize,
}

/// Job orchestrator configuration
#[derive(Debug, Clone)]
pub struct JobOrchestratorConfig {
    /// Number of workers
    pub worker_count: usize,
    /// Capacity of the job queue
    pub queue_capacity: usize,
    /// Deadline given to each job's context
    pub job_timeout: Duration,
    /// Retained jobs before terminal ones are evicted
    pub max_retained_jobs: usize,
    /// How long stop waits for running jobs
    pub shutdown_timeout: Duration,
}

impl Default for JobOrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 100,
            job_timeout: Duration::from_secs(30 * 60),
            max_retained_jobs: 1000,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl JobOrchestratorConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set worker count
    #[must_use]
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Set queue capacity
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set per-job timeout
    #[must_use]
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Set retention cap
    #[must_use]
    pub fn with_max_retained_jobs(mut self, max: usize) -> Self {
        self.max_retained_jobs = max.max(1);
        self
    }

    /// Set shutdown timeout
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
