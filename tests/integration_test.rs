//! Integration tests for Conduit
//!
//! These tests wire the crates together the way the binary does:
//! - conduit-tools: Tool registry, builtins and call contexts
//! - conduit-core: Orchestrator, communication manager, jobs and event bus

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conduit_core::{
    CircuitBreakerConfig, CircuitState, CommunicationConfig, CommunicationManager,
    CorrelationStatus, Error, EventBus, EventBusConfig, EventType, Job, JobOrchestrator,
    JobOrchestratorConfig, JobStatus, JobType, Orchestrator, RetryConfig, ToolRequest, Workflow,
    WorkflowStep,
};
use conduit_tools::{
    register_builtins, CallContext, Tool, ToolInput, ToolOutput, ToolRegistry, ToolSchema,
};
use tokio::time::Instant;
use tokio_test::assert_ok;

/// Tool that fails its first `failures` calls with `message`
struct FlakyTool {
    name: &'static str,
    failures: u32,
    message: &'static str,
    calls: AtomicU32,
    schema: ToolSchema,
}

impl FlakyTool {
    fn new(name: &'static str, failures: u32, message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            failures,
            message,
            calls: AtomicU32::new(0),
            schema: ToolSchema::default(),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "fails a fixed number of times"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(
        &self,
        _ctx: &CallContext,
        input: ToolInput,
    ) -> conduit_tools::Result<ToolOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(conduit_tools::Error::Execution(self.message.to_string()));
        }
        Ok(ToolOutput::ok(input.data))
    }
}

fn orchestrator(bus: &EventBus) -> Arc<Orchestrator> {
    let registry = Arc::new(ToolRegistry::new());
    register_builtins(&registry).unwrap();
    Arc::new(Orchestrator::with_defaults(registry).with_event_bus(bus.clone()))
}

// ============================================================================
// Orchestrator Integration Tests
// ============================================================================

#[tokio::test]
async fn test_workflow_stops_at_first_failure() {
    let bus = EventBus::default();
    let orchestrator = orchestrator(&bus);
    let broken = FlakyTool::new("broken", u32::MAX, "compiler crashed");
    let after = FlakyTool::new("after", 0, "");
    orchestrator.register(broken.clone()).unwrap();
    orchestrator.register(after.clone()).unwrap();

    let workflow: Workflow = serde_json::from_value(serde_json::json!({
        "name": "release",
        "steps": [
            {"name": "A", "tool": "echo", "input": {"tag": "v1"}},
            {"name": "B", "tool": "broken"},
            {"name": "C", "tool": "after"}
        ]
    }))
    .unwrap();

    let result = orchestrator
        .execute_workflow(&CallContext::new(), &workflow)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.total_steps, 3);
    assert_eq!(result.step_results.len(), 2);
    assert_eq!(result.successful_steps, 1);
    assert_eq!(result.failed_steps, 1);
    assert!(result.error.unwrap().contains("compiler crashed"));
    assert_eq!(broken.calls(), 1);
    assert_eq!(after.calls(), 0);

    let types: Vec<EventType> = bus
        .get_event_history(0)
        .iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        vec![EventType::WorkflowStarted, EventType::WorkflowCompleted]
    );
    bus.close().await;
}

#[tokio::test]
async fn test_builtin_workflow_succeeds() {
    let bus = EventBus::default();
    let orchestrator = orchestrator(&bus);
    let workflow = Workflow::new("warmup")
        .with_variable("session_id", "sess-9")
        .with_step(WorkflowStep::new("wait", "sleep").with_input("duration_ms", 1))
        .with_step(WorkflowStep::new("say", "echo").with_input("message", "hi"));

    let result = assert_ok!(
        orchestrator
            .execute_workflow(&CallContext::new(), &workflow)
            .await
    );

    assert!(result.success);
    assert_eq!(result.successful_steps, 2);
    assert_eq!(result.step_results[1].output.as_ref().unwrap().data["message"], "hi");
    bus.close().await;
}

// ============================================================================
// Communication Manager Integration Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_tool_errors_are_retried() {
    let bus = EventBus::default();
    let orchestrator = orchestrator(&bus);
    let flaky = FlakyTool::new("flaky", 2, "connection refused");
    orchestrator.register(flaky.clone()).unwrap();
    let manager =
        CommunicationManager::new(orchestrator, bus.clone(), CommunicationConfig::default());

    let started = Instant::now();
    let response = manager
        .send_request(
            &CallContext::new(),
            ToolRequest::new("flaky").with_parameter("attempt", "any"),
        )
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.attempts, 3);
    assert_eq!(flaky.calls(), 3);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(300), "waited {waited:?}");
    assert!(waited < Duration::from_millis(400), "waited {waited:?}");
    assert_eq!(manager.breaker_state("flaky"), Some(CircuitState::Closed));
    bus.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_breaker_isolates_failing_tool() {
    let bus = EventBus::default();
    let orchestrator = orchestrator(&bus);
    let broken = FlakyTool::new("broken", u32::MAX, "disk full");
    orchestrator.register(broken.clone()).unwrap();
    let config = CommunicationConfig::new()
        .with_retry(RetryConfig::new().with_max_retries(0))
        .with_breaker(
            CircuitBreakerConfig::new()
                .with_max_failures(3)
                .with_reset_timeout(Duration::from_secs(1)),
        );
    let manager = CommunicationManager::new(orchestrator, bus.clone(), config);
    let ctx = CallContext::new();

    for _ in 0..3 {
        let err = manager
            .send_request(&ctx, ToolRequest::new("broken"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }
    let err = manager
        .send_request(&ctx, ToolRequest::new("broken"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CircuitOpen(_)));
    assert_eq!(broken.calls(), 3);

    // Other tools keep working while one breaker is open
    let response = manager
        .send_request(&ctx, ToolRequest::new("echo").with_parameter("ok", true))
        .await
        .unwrap();
    assert!(response.success);

    tokio::time::advance(Duration::from_secs(1)).await;
    let err = manager
        .send_request(&ctx, ToolRequest::new("broken"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Execution(_)));
    assert_eq!(broken.calls(), 4);
    assert_eq!(manager.breaker_state("broken"), Some(CircuitState::Open));
    bus.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_request_deadline_cuts_slow_tool() {
    let bus = EventBus::default();
    let manager = CommunicationManager::new(
        orchestrator(&bus),
        bus.clone(),
        CommunicationConfig::default(),
    );

    let err = manager
        .send_request(
            &CallContext::new(),
            ToolRequest::new("sleep")
                .with_correlation_id("slow-1")
                .with_parameter("duration_ms", 5_000)
                .with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(
        manager.get_correlation("slow-1").unwrap().status,
        CorrelationStatus::Failed
    );
    bus.close().await;
}

// ============================================================================
// Job Orchestrator Integration Tests
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn test_full_job_queue_fails_without_blocking() {
    let bus = EventBus::default();
    let jobs = JobOrchestrator::with_event_bus(
        JobOrchestratorConfig::new()
            .with_worker_count(1)
            .with_queue_capacity(1),
        bus.clone(),
    );

    // Workers cannot drain the queue until this task yields
    let queued = jobs.submit_job(Job::new(JobType::Build)).unwrap();
    let rejected = jobs.submit_job(Job::new("deploy")).unwrap();

    let job = jobs.get_job(&rejected).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("job queue is full"));
    assert_ne!(jobs.get_job(&queued).unwrap().status, JobStatus::Failed);

    jobs.stop().await;
    let stats = jobs.get_stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.failed, 1);
    bus.close().await;
}

// ============================================================================
// Event Bus Integration Tests
// ============================================================================

#[tokio::test]
async fn test_event_history_stays_bounded() {
    let bus = EventBus::new(EventBusConfig::new().with_max_history(5));
    let orchestrator = orchestrator(&bus);

    for i in 0..6 {
        let workflow = Workflow::new(format!("wf-{i}"))
            .with_step(WorkflowStep::new("say", "echo").with_input("i", i));
        orchestrator
            .execute_workflow(&CallContext::new(), &workflow)
            .await
            .unwrap();
    }

    let history = bus.get_event_history(0);
    assert_eq!(history.len(), 5);
    assert_eq!(history.last().unwrap().event_type, EventType::WorkflowCompleted);
    assert_eq!(bus.stats().published, 12);
    bus.close().await;
}
