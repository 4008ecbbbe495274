use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle events published by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A tool request passed correlation and reached the breaker
    ToolRequestStarted,
    /// A tool request finished successfully
    ToolRequestCompleted,
    /// A tool request failed after retries
    ToolRequestFailed,
    /// A workflow began executing
    WorkflowStarted,
    /// A workflow finished (successfully or not)
    WorkflowCompleted,
    /// A job was accepted by the job orchestrator
    JobSubmitted,
    /// A worker picked up a job
    JobStarted,
    /// A job handler returned a result
    JobCompleted,
    /// A job failed or was rejected by a full queue
    JobFailed,
    /// A job was cancelled
    JobCancelled,
}

impl EventType {
    /// Every event type
    pub const ALL: [EventType; 10] = [
        Self::ToolRequestStarted,
        Self::ToolRequestCompleted,
        Self::ToolRequestFailed,
        Self::WorkflowStarted,
        Self::WorkflowCompleted,
        Self::JobSubmitted,
        Self::JobStarted,
        Self::JobCompleted,
        Self::JobFailed,
        Self::JobCancelled,
    ];

    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolRequestStarted => "tool_request_started",
            Self::ToolRequestCompleted => "tool_request_completed",
            Self::ToolRequestFailed => "tool_request_failed",
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowCompleted => "workflow_completed",
            Self::JobSubmitted => "job_submitted",
            Self::JobStarted => "job_started",
            Self::JobCompleted => "job_completed",
            Self::JobFailed => "job_failed",
            Self::JobCancelled => "job_cancelled",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable published event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub id: String,
    /// Event type
    pub event_type: EventType,
    /// Component that published the event
    pub source: String,
    /// Event payload
    pub data: Map<String, Value>,
    /// Publication time
    pub timestamp: DateTime<Utc>,
    /// Session the event belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Event {
    /// Build a new event stamped with a fresh id and the current time
    #[must_use]
    pub fn new(
        event_type: EventType,
        source: impl Into<String>,
        data: Map<String, Value>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            source: source.into(),
            data,
            timestamp: Utc::now(),
            session_id,
        }
    }
}

/// Turn a JSON object into an event payload. Non-objects yield an empty map.
#[must_use]
pub fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Future returned by an event handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Callback invoked for every event of a subscribed type
pub type EventHandler = Arc<dyn Fn(Arc<Event>) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`]
pub fn handler_fn<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

pub(crate) struct Subscription {
    pub(crate) id: String,
    pub(crate) event_type: EventType,
    pub(crate) handler: EventHandler,
    active: AtomicBool,
    handled: AtomicU64,
    errors: AtomicU64,
}

impl Subscription {
    pub(crate) fn new(event_type: EventType, handler: EventHandler) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            handler,
            active: AtomicBool::new(true),
            handled: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn record_handled(&self) {
        self.handled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    pub(crate) fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Per event type subscription counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Registered subscriptions
    pub subscriptions: usize,
    /// Subscriptions still active
    pub active: usize,
    /// Successful handler invocations
    pub handled: u64,
    /// Handler errors, timeouts and panics
    pub errors: u64,
}

/// Bus-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventBusStats {
    /// Events accepted by publish
    pub published: u64,
    /// Events dropped because the channel was full
    pub dropped: u64,
    /// Events currently retained in history
    pub history_len: usize,
    /// Registered subscriptions across all types
    pub subscriptions: usize,
    /// Whether the bus has been closed
    pub closed: bool,
}

/// Event bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Number of dispatch workers
    pub worker_count: usize,
    /// Capacity of the event channel
    pub channel_capacity: usize,
    /// Events retained in history
    pub max_history: usize,
    /// Budget for a single handler invocation
    pub handler_timeout: Duration,
    /// How long close waits for queued events to drain
    pub drain_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            channel_capacity: 1000,
            max_history: 1000,
            handler_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl EventBusConfig {
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

    /// Set channel capacity
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set history size
    #[must_use]
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    /// Set handler timeout
    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Set drain timeout
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}
