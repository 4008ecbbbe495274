use crate::error::{Error, Result};
use crate::event_bus::{payload, EventBus, EventHandler, EventType};
use crate::orchestrator::ToolDispatcher;
use crate::utils::{
    retry_with_backoff, CircuitBreaker, CircuitBreakerSnapshot, CircuitState, LatencyWindow,
    RetryError, Timer,
};
use chrono::Utc;
use conduit_tools::CallContext;
use dashmap::DashMap;
use lru::LruCache;
use serde_json::{json, Value};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::types::{
    CommunicationConfig, CorrelationStatus, RequestCorrelation, RequestMetrics, ToolRequest,
    ToolResponse,
};

const SOURCE: &str = "communication";

struct ToolMetrics {
    metrics: RequestMetrics,
    window: LatencyWindow,
}

/// Routes tool requests through breakers, retries and correlation tracking
pub struct CommunicationManager {
    dispatcher: Arc<dyn ToolDispatcher>,
    event_bus: EventBus,
    config: CommunicationConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    metrics: DashMap<String, ToolMetrics>,
    correlations: Mutex<LruCache<String, RequestCorrelation>>,
    closed: AtomicBool,
}

impl CommunicationManager {
    /// Create a manager around a dispatcher
    #[must_use]
    pub fn new(
        dispatcher: Arc<dyn ToolDispatcher>,
        event_bus: EventBus,
        config: CommunicationConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.max_correlations).unwrap_or(NonZeroUsize::MIN);
        Self {
            dispatcher,
            event_bus,
            config,
            breakers: DashMap::new(),
            metrics: DashMap::new(),
            correlations: Mutex::new(LruCache::new(capacity)),
            closed: AtomicBool::new(false),
        }
    }

    /// The active configuration
    #[must_use]
    pub fn config(&self) -> &CommunicationConfig {
        &self.config
    }

    /// Send a request, retrying transient failures.
    ///
    /// Calls denied by the tool's circuit breaker fail with
    /// [`Error::CircuitOpen`] without reaching the dispatcher.
    #[instrument(skip(self, ctx, request), fields(tool = %request.tool_name, correlation_id))]
    pub async fn send_request(
        &self,
        ctx: &CallContext,
        mut request: ToolRequest,
    ) -> Result<ToolResponse> {
        if self.is_closed() {
            return Err(Error::Closed("communication manager"));
        }

        if request.correlation_id.is_empty() {
            request.correlation_id = format!("corr_{}", Uuid::new_v4().simple());
        }
        if request.id.is_empty() {
            request.id = Uuid::new_v4().to_string();
        }
        tracing::Span::current().record("correlation_id", request.correlation_id.as_str());

        let timer = Timer::start();
        self.track(&request);

        let breaker = self.breaker(&request.tool_name);
        if !breaker.allow() {
            self.finish_correlation(&request.correlation_id, CorrelationStatus::CircuitBreakerOpen);
            self.publish(EventType::ToolRequestStarted, &request, json!({}));
            warn!(
                tool = %request.tool_name,
                correlation_id = %request.correlation_id,
                "Request blocked by circuit breaker"
            );
            return Err(Error::CircuitOpen(request.tool_name));
        }

        self.publish(EventType::ToolRequestStarted, &request, json!({}));
        info!(
            tool = %request.tool_name,
            session_id = %request.session_id,
            correlation_id = %request.correlation_id,
            "Sending tool request"
        );

        let call_ctx = match request.timeout_ms {
            Some(ms) => ctx.with_timeout(Duration::from_millis(ms)),
            None => ctx.child(),
        };

        let mut attempts = 0;
        let outcome = retry_with_backoff(
            &self.config.retry,
            &call_ctx,
            |attempt| {
                attempts = attempt;
                let input = request.to_input();
                let dispatcher = &self.dispatcher;
                let call_ctx = &call_ctx;
                let tool_name = request.tool_name.as_str();
                async move { dispatcher.execute(call_ctx, tool_name, input).await }
            },
            Error::is_retryable,
        )
        .await;

        let duration = timer.elapsed();
        let duration_ms = duration.as_millis() as u64;

        match outcome {
            Ok(output) => {
                breaker.record_success();
                self.record_metrics(&request.tool_name, duration, true);
                self.finish_correlation(&request.correlation_id, CorrelationStatus::Completed);

                let response = ToolResponse::from_output(&request, output, duration, attempts);
                self.publish(
                    EventType::ToolRequestCompleted,
                    &request,
                    json!({
                        "duration_ms": duration_ms,
                        "attempts": attempts,
                        "success": response.success,
                    }),
                );
                info!(
                    tool = %request.tool_name,
                    correlation_id = %request.correlation_id,
                    duration_ms,
                    attempts,
                    "Tool request completed"
                );
                Ok(response)
            }
            Err(RetryError {
                last_error,
                attempts,
            }) => {
                breaker.record_failure();
                self.record_metrics(&request.tool_name, duration, false);
                self.finish_correlation(&request.correlation_id, CorrelationStatus::Failed);

                self.publish(
                    EventType::ToolRequestFailed,
                    &request,
                    json!({
                        "duration_ms": duration_ms,
                        "attempts": attempts,
                        "error": last_error.to_string(),
                    }),
                );
                error!(
                    tool = %request.tool_name,
                    correlation_id = %request.correlation_id,
                    duration_ms,
                    attempts,
                    error = %last_error,
                    "Tool request failed"
                );
                Err(last_error)
            }
        }
    }

    /// Look up a correlation without refreshing its recency
    #[must_use]
    pub fn get_correlation(&self, correlation_id: &str) -> Option<RequestCorrelation> {
        self.correlations().peek(correlation_id).cloned()
    }

    /// Number of tracked correlations
    #[must_use]
    pub fn correlation_count(&self) -> usize {
        self.correlations().len()
    }

    /// Metrics for one tool
    #[must_use]
    pub fn get_metrics(&self, tool_name: &str) -> Option<RequestMetrics> {
        self.metrics.get(tool_name).map(|m| m.metrics.clone())
    }

    /// Metrics for every tool seen so far, sorted by name
    #[must_use]
    pub fn get_all_metrics(&self) -> Vec<RequestMetrics> {
        let mut all: Vec<RequestMetrics> =
            self.metrics.iter().map(|m| m.metrics.clone()).collect();
        all.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
        all
    }

    /// State of a tool's breaker, if one has been created
    #[must_use]
    pub fn breaker_state(&self, tool_name: &str) -> Option<CircuitState> {
        self.breakers.get(tool_name).map(|b| b.state())
    }

    /// Snapshots of all breakers, sorted by name
    #[must_use]
    pub fn breakers(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut all: Vec<CircuitBreakerSnapshot> =
            self.breakers.iter().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Drop a tool's breaker, e.g. after the tool is unregistered
    pub fn remove_breaker(&self, tool_name: &str) -> bool {
        let removed = self.breakers.remove(tool_name).is_some();
        if removed {
            debug!(tool = %tool_name, "Circuit breaker removed");
        }
        removed
    }

    /// Drop a tool's request metrics
    pub fn remove_metrics(&self, tool_name: &str) -> bool {
        let removed = self.metrics.remove(tool_name).is_some();
        if removed {
            debug!(tool = %tool_name, "Request metrics removed");
        }
        removed
    }

    /// Subscribe to events on the shared bus
    pub fn subscribe_to_events(&self, event_type: EventType, handler: EventHandler) -> String {
        self.event_bus.subscribe(event_type, handler)
    }

    /// The shared event bus
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Whether close has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reject further requests. Idempotent.
    ///
    /// The event bus is shared and is closed by its owner.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(
                correlations = self.correlation_count(),
                "Communication manager closed"
            );
        }
    }

    fn breaker(&self, tool_name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(tool_name.to_string())
            .or_insert_with(|| {
                debug!(tool = %tool_name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(tool_name, self.config.breaker.clone()))
            })
            .clone()
    }

    fn correlations(&self) -> MutexGuard<'_, LruCache<String, RequestCorrelation>> {
        self.correlations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, request: &ToolRequest) {
        let mut correlations = self.correlations();

        let mut root_request_id = request.correlation_id.clone();
        if let Some(parent_id) = request.parent_id.as_deref() {
            if let Some(parent) = correlations.get_mut(parent_id) {
                parent.tool_chain.push(request.tool_name.clone());
                root_request_id = parent.root_request_id.clone();
            }
        }

        let correlation = RequestCorrelation {
            id: request.correlation_id.clone(),
            root_request_id,
            parent_id: request.parent_id.clone(),
            session_id: request.session_id.clone(),
            start_time: Utc::now(),
            end_time: None,
            status: CorrelationStatus::Pending,
            tool_chain: vec![request.tool_name.clone()],
            context: request.context.clone(),
        };

        if let Some((evicted, _)) = correlations.push(request.correlation_id.clone(), correlation)
        {
            if evicted != request.correlation_id {
                debug!(correlation_id = %evicted, "Evicted least recently used correlation");
            }
        }
    }

    fn finish_correlation(&self, correlation_id: &str, status: CorrelationStatus) {
        if let Some(correlation) = self.correlations().get_mut(correlation_id) {
            correlation.status = status;
            correlation.end_time = Some(Utc::now());
        }
    }

    fn record_metrics(&self, tool_name: &str, latency: Duration, success: bool) {
        let mut entry = self
            .metrics
            .entry(tool_name.to_string())
            .or_insert_with(|| ToolMetrics {
                metrics: RequestMetrics::new(tool_name),
                window: LatencyWindow::new(self.config.metrics_window),
            });
        let ToolMetrics { metrics, window } = &mut *entry;

        window.record(latency);
        metrics.total_requests += 1;
        if success {
            metrics.successful_requests += 1;
        } else {
            metrics.failed_requests += 1;
        }
        metrics.average_latency = window.average();
        metrics.p95_latency = window.p95();
        metrics.error_rate = metrics.failed_requests as f64 / metrics.total_requests as f64;
        metrics.last_request_time = Some(Utc::now());
    }

    fn publish(&self, event_type: EventType, request: &ToolRequest, extra: Value) {
        let mut data = payload(json!({
            "request_id": request.id,
            "tool_name": request.tool_name,
            "correlation_id": request.correlation_id,
            "session_id": request.session_id,
        }));
        data.extend(payload(extra));

        let session_id = (!request.session_id.is_empty()).then(|| request.session_id.clone());
        self.event_bus
            .publish_from(SOURCE, event_type, data, session_id);
    }
}
