//! Job execution engine
//!
//! A fixed pool of workers drains a bounded channel of job ids. Job state
//! lives in a shared map; every status change goes through
//! [`JobStatus::can_transition_to`] so terminal jobs never change again.

use crate::error::{Error, Result};
use crate::event_bus::{payload, EventBus, EventType};
use chrono::Utc;
use conduit_tools::CallContext;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::types::{Job, JobHandler, JobOrchestratorConfig, JobStatus, JobType, OrchestratorStats};

const PANIC_MESSAGE: &str = "job handler panicked";

struct JobEntry {
    job: Job,
    token: CancellationToken,
}

struct QueuedJob {
    id: String,
    handler: Option<Arc<dyn JobHandler>>,
}

/// State shared with the workers
struct JobStore {
    jobs: RwLock<HashMap<String, JobEntry>>,
    event_bus: Option<EventBus>,
    job_timeout: Duration,
}

/// Asynchronous job orchestrator.
///
/// Must be created inside a Tokio runtime.
pub struct JobOrchestrator {
    config: JobOrchestratorConfig,
    store: Arc<JobStore>,
    handlers: RwLock<HashMap<JobType, Arc<dyn JobHandler>>>,
    sender: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl JobOrchestrator {
    /// Create the orchestrator and start its workers
    #[must_use]
    pub fn new(config: JobOrchestratorConfig) -> Self {
        Self::build(config, None)
    }

    /// Create the orchestrator with job lifecycle events published to `event_bus`
    #[must_use]
    pub fn with_event_bus(config: JobOrchestratorConfig, event_bus: EventBus) -> Self {
        Self::build(config, Some(event_bus))
    }

    fn build(config: JobOrchestratorConfig, event_bus: Option<EventBus>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let shutdown = CancellationToken::new();
        let store = Arc::new(JobStore {
            jobs: RwLock::new(HashMap::new()),
            event_bus,
            job_timeout: config.job_timeout,
        });

        let workers = (0..config.worker_count.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    store.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            "Job orchestrator started"
        );

        Self {
            config,
            store,
            handlers: RwLock::new(HashMap::new()),
            sender: Mutex::new(Some(sender)),
            shutdown,
            workers: Mutex::new(workers),
            stopped: AtomicBool::new(false),
        }
    }

    /// Register the handler for a job type, replacing any previous one
    pub fn register_handler(&self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        debug!(job_type = %job_type, "Job handler registered");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_type, handler);
    }

    /// Submit a job without blocking.
    ///
    /// When the queue is full the job is stored as `Failed` and its id is
    /// still returned.
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type))]
    pub fn submit_job(&self, mut job: Job) -> Result<String> {
        if self.is_stopped() {
            return Err(Error::Closed("job orchestrator"));
        }

        job.status = JobStatus::Pending;
        job.result = None;
        job.error = None;
        job.started_at = None;
        job.completed_at = None;
        let id = job.id.clone();
        let job_type = job.job_type.clone();

        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_type)
            .cloned();

        {
            let mut jobs = self.store.write();
            if jobs.contains_key(&id) {
                return Err(Error::Validation(format!("job already exists: {}", id)));
            }
            evict_terminal(&mut jobs, self.config.max_retained_jobs);
            jobs.insert(
                id.clone(),
                JobEntry {
                    job,
                    token: self.shutdown.child_token(),
                },
            );
        }
        self.store
            .publish(EventType::JobSubmitted, &id, &job_type, JobStatus::Pending, None);

        let sent = {
            let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
            match sender.as_ref() {
                Some(sender) => sender.try_send(QueuedJob {
                    id: id.clone(),
                    handler,
                }),
                None => Err(TrySendError::Closed(QueuedJob {
                    id: id.clone(),
                    handler,
                })),
            }
        };

        match sent {
            Ok(()) => {
                debug!("Job queued");
                Ok(id)
            }
            Err(TrySendError::Full(_)) => {
                warn!("Job queue full, failing job");
                self.store.fail_pending(&id, &Error::QueueFull.to_string());
                Ok(id)
            }
            Err(TrySendError::Closed(_)) => {
                let err = Error::Closed("job orchestrator");
                self.store.fail_pending(&id, &err.to_string());
                Err(err)
            }
        }
    }

    /// Cancel a pending or running job.
    ///
    /// A running handler is signalled through its context and is expected to
    /// stop on its own; its eventual result is discarded.
    #[instrument(skip(self))]
    pub fn cancel_job(&self, id: &str) -> Result<()> {
        let job_type = {
            let mut jobs = self.store.write();
            let entry = jobs.get_mut(id).ok_or_else(|| Error::job_not_found(id))?;
            let current = entry.job.status;
            if !entry.job.transition(JobStatus::Cancelled) {
                return Err(Error::Validation(format!(
                    "job {} is already {}",
                    id, current
                )));
            }
            entry.token.cancel();
            entry.job.job_type.clone()
        };

        info!(job_id = %id, "Job cancelled");
        self.store
            .publish(EventType::JobCancelled, id, &job_type, JobStatus::Cancelled, None);
        Ok(())
    }

    /// Snapshot of a job
    #[must_use]
    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.store.read().get(id).map(|entry| entry.job.clone())
    }

    /// Jobs in creation order, optionally filtered by status
    #[must_use]
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .store
            .read()
            .values()
            .filter(|entry| status.map_or(true, |s| entry.job.status == s))
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Job counts by status
    #[must_use]
    pub fn get_stats(&self) -> OrchestratorStats {
        let jobs = self.store.read();
        let mut stats = OrchestratorStats {
            total: jobs.len(),
            ..Default::default()
        };
        for entry in jobs.values() {
            match entry.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Remove terminal jobs that finished more than `older_than` ago.
    ///
    /// Returns the number of jobs removed.
    pub fn purge_finished(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut jobs = self.store.write();
        let before = jobs.len();
        jobs.retain(|_, entry| {
            !(entry.job.status.is_terminal()
                && entry.job.completed_at.map_or(false, |at| at <= cutoff))
        });
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(removed, "Purged finished jobs");
        }
        removed
    }

    /// Whether stop has been called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop intake, signal running jobs and join the workers. Idempotent.
    ///
    /// Workers still busy after the shutdown timeout are aborted. Jobs still
    /// queued, and jobs whose worker was aborted, are marked cancelled.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.cancel();
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let workers: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let abort_handles: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();

        if tokio::time::timeout(
            self.config.shutdown_timeout,
            futures::future::join_all(workers),
        )
        .await
        .is_err()
        {
            warn!(
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "Job workers did not stop in time, aborting"
            );
            for handle in abort_handles {
                handle.abort();
            }
        }

        // queued jobs never started, running ones belonged to aborted workers
        let abandoned: Vec<(String, JobType)> = {
            let mut jobs = self.store.write();
            jobs.values_mut()
                .filter(|entry| !entry.job.status.is_terminal())
                .filter_map(|entry| {
                    entry
                        .job
                        .transition(JobStatus::Cancelled)
                        .then(|| (entry.job.id.clone(), entry.job.job_type.clone()))
                })
                .collect()
        };
        for (id, job_type) in &abandoned {
            self.store
                .publish(EventType::JobCancelled, id, job_type, JobStatus::Cancelled, None);
        }

        info!(abandoned = abandoned.len(), "Job orchestrator stopped");
    }
}

impl JobStore {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail_pending(&self, id: &str, message: &str) {
        let job_type = {
            let mut jobs = self.write();
            let Some(entry) = jobs.get_mut(id) else {
                return;
            };
            if !entry.job.transition(JobStatus::Failed) {
                return;
            }
            entry.job.error = Some(message.to_string());
            entry.job.job_type.clone()
        };
        self.publish(EventType::JobFailed, id, &job_type, JobStatus::Failed, Some(message));
    }

    /// Move a queued job to running. `None` if it was cancelled meanwhile.
    fn start(&self, id: &str) -> Option<(Job, CancellationToken)> {
        let mut jobs = self.write();
        let entry = jobs.get_mut(id)?;
        if !entry.job.transition(JobStatus::Running) {
            return None;
        }
        Some((entry.job.clone(), entry.token.clone()))
    }

    fn finish(&self, id: &str, outcome: std::result::Result<Option<Value>, String>) {
        let (job_type, status, message) = {
            let mut jobs = self.write();
            let Some(entry) = jobs.get_mut(id) else {
                return;
            };
            if entry.job.status != JobStatus::Running {
                debug!(job_id = %id, status = %entry.job.status, "Discarding result of finished job");
                return;
            }
            match outcome {
                Ok(result) => {
                    entry.job.transition(JobStatus::Completed);
                    entry.job.result = result;
                    (entry.job.job_type.clone(), JobStatus::Completed, None)
                }
                // stopped underneath the handler
                Err(_) if entry.token.is_cancelled() => {
                    entry.job.transition(JobStatus::Cancelled);
                    (entry.job.job_type.clone(), JobStatus::Cancelled, None)
                }
                Err(message) => {
                    entry.job.transition(JobStatus::Failed);
                    entry.job.error = Some(message.clone());
                    (entry.job.job_type.clone(), JobStatus::Failed, Some(message))
                }
            }
        };

        let event_type = match status {
            JobStatus::Completed => EventType::JobCompleted,
            JobStatus::Cancelled => EventType::JobCancelled,
            _ => EventType::JobFailed,
        };
        self.publish(event_type, id, &job_type, status, message.as_deref());
    }

    fn publish(
        &self,
        event_type: EventType,
        id: &str,
        job_type: &JobType,
        status: JobStatus,
        error: Option<&str>,
    ) {
        let Some(bus) = &self.event_bus else {
            return;
        };
        let mut data = payload(json!({
            "job_id": id,
            "job_type": job_type.as_str(),
            "status": status.to_string(),
        }));
        if let Some(error) = error {
            data.insert("error".into(), Value::String(error.to_string()));
        }
        bus.publish_from("jobs", event_type, data, None);
    }

    async fn run_job(&self, queued: QueuedJob) {
        let Some((job, token)) = self.start(&queued.id) else {
            debug!(job_id = %queued.id, "Skipping job that is no longer pending");
            return;
        };
        self.publish(EventType::JobStarted, &job.id, &job.job_type, JobStatus::Running, None);
        debug!(job_id = %job.id, job_type = %job.job_type, "Job started");

        let outcome = match queued.handler {
            None => {
                debug!(job_type = %job.job_type, "No handler registered, completing job");
                Ok(None)
            }
            Some(handler) => {
                let ctx = CallContext::from_token(token).with_timeout(self.job_timeout);
                match AssertUnwindSafe(handler.handle(&ctx, &job))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => {
                        error!(job_id = %job.id, "Job handler panicked");
                        Err(PANIC_MESSAGE.to_string())
                    }
                }
            }
        };

        match &outcome {
            Ok(_) => info!(job_id = %job.id, "Job completed"),
            Err(e) => warn!(job_id = %job.id, error = %e, "Job failed"),
        }
        self.finish(&job.id, outcome);
    }
}

/// Drop the oldest terminal jobs until there is room for one more.
fn evict_terminal(jobs: &mut HashMap<String, JobEntry>, max_retained: usize) {
    if jobs.len() < max_retained {
        return;
    }
    let mut terminal: Vec<(chrono::DateTime<Utc>, String)> = jobs
        .values()
        .filter(|entry| entry.job.status.is_terminal())
        .map(|entry| (entry.job.created_at, entry.job.id.clone()))
        .collect();
    terminal.sort();

    let excess = jobs.len() + 1 - max_retained;
    for (_, id) in terminal.into_iter().take(excess) {
        jobs.remove(&id);
    }
    if jobs.len() >= max_retained {
        warn!(
            retained = jobs.len(),
            max_retained, "Job retention cap reached with no finished jobs to evict"
        );
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>,
    store: Arc<JobStore>,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "Job worker started");
    loop {
        let queued = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                queued = receiver.recv() => queued,
            }
        };
        let Some(queued) = queued else {
            break;
        };
        store.run_job(queued).await;
    }
    debug!(worker_id, "Job worker stopped");
}
