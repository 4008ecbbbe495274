use super::*;
use crate::error::{Error, ErrorKind, Result};
use crate::event_bus::{EventBus, EventType};
use conduit_tools::CallContext;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct EchoParams;

#[async_trait::async_trait]
impl JobHandler for EchoParams {
    async fn handle(&self, _ctx: &CallContext, job: &Job) -> Result<Option<Value>> {
        Ok(Some(Value::Object(job.parameters.clone())))
    }
}

struct Failing;

#[async_trait::async_trait]
impl JobHandler for Failing {
    async fn handle(&self, _ctx: &CallContext, _job: &Job) -> Result<Option<Value>> {
        Err(Error::Execution("build context missing".into()))
    }
}

struct Panicking;

#[async_trait::async_trait]
impl JobHandler for Panicking {
    async fn handle(&self, _ctx: &CallContext, _job: &Job) -> Result<Option<Value>> {
        panic!("boom")
    }
}

/// Waits for cancellation or the deadline, then reports why it stopped
struct WaitForContext {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl JobHandler for WaitForContext {
    async fn handle(&self, ctx: &CallContext, _job: &Job) -> Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::from(ctx.done().await))
    }
}

/// Sleeps for an hour without looking at its context
struct IgnoresContext;

#[async_trait::async_trait]
impl JobHandler for IgnoresContext {
    async fn handle(&self, _ctx: &CallContext, _job: &Job) -> Result<Option<Value>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }
}

struct Counting {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl JobHandler for Counting {
    async fn handle(&self, _ctx: &CallContext, _job: &Job) -> Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(json!("done")))
    }
}

async fn wait_for(orchestrator: &JobOrchestrator, id: &str, status: JobStatus) -> Job {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(job) = orchestrator.get_job(id) {
                if job.status == status {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {id} never reached {status}"))
}

#[test]
fn test_status_transitions_are_monotonic() {
    use JobStatus::*;
    let all = [Pending, Running, Completed, Failed, Cancelled];
    let legal = [
        (Pending, Running),
        (Pending, Failed),
        (Pending, Cancelled),
        (Running, Completed),
        (Running, Failed),
        (Running, Cancelled),
    ];

    for from in all {
        for to in all {
            assert_eq!(
                from.can_transition_to(to),
                legal.contains(&(from, to)),
                "{from} -> {to}"
            );
        }
        if from.is_terminal() {
            assert!(all.iter().all(|to| !from.can_transition_to(*to)));
        }
    }
}

#[test]
fn test_job_type_serialization() {
    assert_eq!(serde_json::to_value(JobType::Build).unwrap(), "build");
    assert_eq!(
        serde_json::to_value(JobType::Custom("cleanup".into())).unwrap(),
        "cleanup"
    );
    let parsed: JobType = serde_json::from_value(json!("deploy")).unwrap();
    assert_eq!(parsed, JobType::Deploy);
    let parsed: JobType = serde_json::from_value(json!("cleanup")).unwrap();
    assert_eq!(parsed, JobType::Custom("cleanup".into()));
}

#[tokio::test]
async fn test_submit_and_complete() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::default());
    orchestrator.register_handler(JobType::Analysis, Arc::new(EchoParams));

    let job = Job::new(JobType::Analysis).with_parameter("repo", "acme/app");
    let id = orchestrator.submit_job(job).unwrap();

    let job = wait_for(&orchestrator, &id, JobStatus::Completed).await;
    assert_eq!(job.result, Some(json!({"repo": "acme/app"})));
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert!(job.error.is_none());

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_unknown_type_completes_without_result() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::default());
    let id = orchestrator.submit_job(Job::new("cleanup")).unwrap();

    let job = wait_for(&orchestrator, &id, JobStatus::Completed).await;
    assert!(job.result.is_none());
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_handler_error_fails_job() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::default());
    orchestrator.register_handler(JobType::Build, Arc::new(Failing));

    let id = orchestrator.submit_job(Job::new(JobType::Build)).unwrap();
    let job = wait_for(&orchestrator, &id, JobStatus::Failed).await;
    assert_eq!(
        job.error.as_deref(),
        Some("execution error: build context missing")
    );
    assert!(job.completed_at.is_some());
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_handler_panic_is_contained() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::new().with_worker_count(1));
    orchestrator.register_handler(JobType::Deploy, Arc::new(Panicking));
    orchestrator.register_handler(JobType::Analysis, Arc::new(EchoParams));

    let panicked = orchestrator.submit_job(Job::new(JobType::Deploy)).unwrap();
    let healthy = orchestrator.submit_job(Job::new(JobType::Analysis)).unwrap();

    let job = wait_for(&orchestrator, &panicked, JobStatus::Failed).await;
    assert_eq!(job.error.as_deref(), Some("job handler panicked"));
    wait_for(&orchestrator, &healthy, JobStatus::Completed).await;
    orchestrator.stop().await;
}

// Current-thread runtime: workers cannot drain the queue until the test
// yields, so the queue fills deterministically.
#[tokio::test]
async fn test_full_queue_fails_job_without_blocking() {
    let orchestrator = JobOrchestrator::new(
        JobOrchestratorConfig::new()
            .with_worker_count(1)
            .with_queue_capacity(1),
    );

    let queued = orchestrator.submit_job(Job::new(JobType::Analysis)).unwrap();
    let rejected = orchestrator.submit_job(Job::new(JobType::Analysis)).unwrap();

    assert_eq!(
        orchestrator.get_job(&queued).unwrap().status,
        JobStatus::Pending
    );
    let job = orchestrator.get_job(&rejected).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("job queue is full"));
    assert!(job.completed_at.is_some());

    wait_for(&orchestrator, &queued, JobStatus::Completed).await;
    assert_eq!(
        orchestrator.get_job(&rejected).unwrap().status,
        JobStatus::Failed
    );
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_cancel_pending_job_is_never_run() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::new().with_worker_count(1));
    let handler = Arc::new(Counting {
        calls: AtomicUsize::new(0),
    });
    orchestrator.register_handler(JobType::Build, handler.clone());

    let id = orchestrator.submit_job(Job::new(JobType::Build)).unwrap();
    orchestrator.cancel_job(&id).unwrap();

    let marker = orchestrator.submit_job(Job::new(JobType::Build)).unwrap();
    wait_for(&orchestrator, &marker, JobStatus::Completed).await;

    let job = orchestrator.get_job(&id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.completed_at.is_some());
    assert!(job.started_at.is_none());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_cancel_running_job_signals_handler() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::default());
    let handler = Arc::new(WaitForContext {
        calls: AtomicUsize::new(0),
    });
    orchestrator.register_handler(JobType::Deploy, handler.clone());

    let id = orchestrator.submit_job(Job::new(JobType::Deploy)).unwrap();
    wait_for(&orchestrator, &id, JobStatus::Running).await;
    orchestrator.cancel_job(&id).unwrap();

    // give the handler time to observe the signal and return
    tokio::time::sleep(Duration::from_millis(50)).await;
    let job = orchestrator.get_job(&id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.error.is_none());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_cancel_errors() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::default());
    let err = orchestrator.cancel_job("missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let id = orchestrator.submit_job(Job::new("noop")).unwrap();
    wait_for(&orchestrator, &id, JobStatus::Completed).await;
    let err = orchestrator.cancel_job(&id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        orchestrator.get_job(&id).unwrap().status,
        JobStatus::Completed
    );
    orchestrator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_job_timeout_reaches_handler() {
    let orchestrator = JobOrchestrator::new(
        JobOrchestratorConfig::new().with_job_timeout(Duration::from_millis(50)),
    );
    orchestrator.register_handler(
        JobType::Analysis,
        Arc::new(WaitForContext {
            calls: AtomicUsize::new(0),
        }),
    );

    let id = orchestrator.submit_job(Job::new(JobType::Analysis)).unwrap();
    let job = wait_for(&orchestrator, &id, JobStatus::Failed).await;
    assert_eq!(job.error.as_deref(), Some("execution timeout after 50ms"));
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_list_jobs_and_stats() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::new().with_worker_count(1));
    orchestrator.register_handler(JobType::Build, Arc::new(Failing));

    let first = orchestrator.submit_job(Job::new("noop")).unwrap();
    let second = orchestrator.submit_job(Job::new(JobType::Build)).unwrap();
    wait_for(&orchestrator, &first, JobStatus::Completed).await;
    wait_for(&orchestrator, &second, JobStatus::Failed).await;

    let all = orchestrator.list_jobs(None);
    assert_eq!(all.len(), 2);
    assert!(all[0].created_at <= all[1].created_at);

    let failed = orchestrator.list_jobs(Some(JobStatus::Failed));
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, second);

    let stats = orchestrator.get_stats();
    assert_eq!(
        stats,
        OrchestratorStats {
            total: 2,
            completed: 1,
            failed: 1,
            ..Default::default()
        }
    );
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_duplicate_job_id_rejected() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::default());
    let job = Job::new("noop");
    orchestrator.submit_job(job.clone()).unwrap();
    let err = orchestrator.submit_job(job).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_retention_evicts_oldest_finished() {
    let orchestrator =
        JobOrchestrator::new(JobOrchestratorConfig::new().with_max_retained_jobs(3));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = orchestrator.submit_job(Job::new("noop")).unwrap();
        wait_for(&orchestrator, &id, JobStatus::Completed).await;
        ids.push(id);
    }

    let newest = orchestrator.submit_job(Job::new("noop")).unwrap();
    assert!(orchestrator.get_job(&ids[0]).is_none());
    assert!(orchestrator.get_job(&ids[1]).is_some());
    assert!(orchestrator.get_job(&newest).is_some());
    assert_eq!(orchestrator.get_stats().total, 3);
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_purge_finished() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::default());
    let id = orchestrator.submit_job(Job::new("noop")).unwrap();
    wait_for(&orchestrator, &id, JobStatus::Completed).await;

    assert_eq!(orchestrator.purge_finished(Duration::from_secs(3600)), 0);
    assert_eq!(orchestrator.purge_finished(Duration::ZERO), 1);
    assert!(orchestrator.get_job(&id).is_none());
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_rejects_submissions() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::default());
    orchestrator.stop().await;
    orchestrator.stop().await;

    assert!(orchestrator.is_stopped());
    assert!(matches!(
        orchestrator.submit_job(Job::new("noop")),
        Err(Error::Closed("job orchestrator"))
    ));
}

#[tokio::test]
async fn test_stop_cancels_queued_jobs() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::new().with_worker_count(1));
    let id = orchestrator.submit_job(Job::new("noop")).unwrap();

    orchestrator.stop().await;
    assert_eq!(
        orchestrator.get_job(&id).unwrap().status,
        JobStatus::Cancelled
    );
}

#[tokio::test]
async fn test_stop_cancels_running_jobs() {
    let orchestrator = JobOrchestrator::new(JobOrchestratorConfig::default());
    orchestrator.register_handler(
        JobType::Build,
        Arc::new(WaitForContext {
            calls: AtomicUsize::new(0),
        }),
    );

    let id = orchestrator.submit_job(Job::new(JobType::Build)).unwrap();
    wait_for(&orchestrator, &id, JobStatus::Running).await;
    orchestrator.stop().await;

    let job = orchestrator.get_job(&id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.error.is_none());
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn test_stop_aborts_handlers_that_ignore_cancellation() {
    let bus = EventBus::default();
    let orchestrator = JobOrchestrator::with_event_bus(
        JobOrchestratorConfig::new().with_shutdown_timeout(Duration::from_millis(50)),
        bus.clone(),
    );
    orchestrator.register_handler(JobType::Deploy, Arc::new(IgnoresContext));

    let id = orchestrator.submit_job(Job::new(JobType::Deploy)).unwrap();
    wait_for(&orchestrator, &id, JobStatus::Running).await;

    tokio::time::timeout(Duration::from_secs(5), orchestrator.stop())
        .await
        .expect("stop must return after the shutdown timeout");

    let job = orchestrator.get_job(&id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.completed_at.is_some());
    let stats = orchestrator.get_stats();
    assert_eq!(stats.running, 0);
    assert_eq!(stats.cancelled, 1);

    let last = bus.get_event_history(1);
    assert_eq!(last[0].event_type, EventType::JobCancelled);
    assert_eq!(last[0].data["job_id"], Value::String(id));
    bus.close().await;
}

#[tokio::test]
async fn test_lifecycle_events() {
    let bus = EventBus::default();
    let orchestrator =
        JobOrchestrator::with_event_bus(JobOrchestratorConfig::default(), bus.clone());

    let id = orchestrator.submit_job(Job::new(JobType::Analysis)).unwrap();
    wait_for(&orchestrator, &id, JobStatus::Completed).await;
    orchestrator.stop().await;

    let types: Vec<EventType> = bus
        .get_event_history(0)
        .iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        vec![
            EventType::JobSubmitted,
            EventType::JobStarted,
            EventType::JobCompleted
        ]
    );
    let completed = bus.get_event_history(1);
    assert_eq!(completed[0].data["job_id"], Value::String(id));
    assert_eq!(completed[0].source, "jobs");
    bus.close().await;
}
