//! Conduit Core - Resilient Execution Engine
//!
//! This crate provides the execution core that sits between callers and tools,
//! including:
//! - Orchestrator: Validated, time-bounded tool calls and sequential workflows
//! - Jobs: Asynchronous jobs on a bounded queue and worker pool
//! - Communication: Correlated requests with retries and per-tool circuit breakers
//! - EventBus: Non-blocking lifecycle events with bounded history
//! - Utils: Retry logic, circuit breaker, and lightweight metrics

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod communication;
pub mod error;
pub mod event_bus;
pub mod jobs;
pub mod orchestrator;
pub mod utils;

pub use communication::{
    CommunicationConfig, CommunicationManager, CorrelationStatus, RequestCorrelation,
    RequestMetrics, ToolRequest, ToolResponse,
};
pub use error::{Error, ErrorKind, Result, RETRYABLE_PATTERNS};
pub use event_bus::{
    handler_fn, payload, Event, EventBus, EventBusConfig, EventBusStats, EventHandler, EventType,
    SubscriptionStats,
};
pub use jobs::{
    Job, JobHandler, JobOrchestrator, JobOrchestratorConfig, JobStatus, JobType,
    OrchestratorStats,
};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, StepResult, ToolDispatcher, Workflow, WorkflowResult,
    WorkflowStep,
};
pub use utils::{
    retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
    CircuitState, RetryConfig, RetryError,
};
