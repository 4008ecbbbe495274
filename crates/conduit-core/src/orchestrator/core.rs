//! Orchestrator core structure
//!
//! Contains the `Orchestrator` struct, its builder methods and single tool
//! dispatch.

use crate::error::{Error, Result};
use crate::event_bus::EventBus;
use crate::utils::{Counter, Gauge, Timer};
use conduit_tools::{CallContext, Tool, ToolDefinition, ToolInput, ToolOutput, ToolRegistry};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::config::OrchestratorConfig;
use super::types::ToolDispatcher;

/// Dispatches tool calls against a registry
pub struct Orchestrator {
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) config: OrchestratorConfig,
    pub(crate) event_bus: Option<EventBus>,
    closed: AtomicBool,
    requests: Counter,
    errors: Counter,
    total_duration_ms: Counter,
    in_flight: Gauge,
}

impl Orchestrator {
    /// Create a new orchestrator
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            config,
            event_bus: None,
            closed: AtomicBool::new(false),
            requests: Counter::new(),
            errors: Counter::new(),
            total_duration_ms: Counter::new(),
            in_flight: Gauge::new(),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(registry: Arc<ToolRegistry>) -> Self {
        Self::new(registry, OrchestratorConfig::default())
    }

    /// Attach an event bus for workflow events
    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// The underlying registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The active configuration
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Register a tool
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        self.registry.register(tool).map_err(Error::from)
    }

    /// Unregister a tool
    pub fn unregister(&self, name: &str) -> Result<()> {
        self.registry.unregister(name).map_err(Error::from)
    }

    /// Names of all registered tools
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Definitions of all registered tools
    #[must_use]
    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.list_definitions()
    }

    /// Execute a tool by name.
    ///
    /// When `ctx` has no deadline the configured default timeout applies.
    #[instrument(skip(self, ctx, input), fields(tool = %tool_name, session_id = %input.session_id))]
    pub async fn execute(
        &self,
        ctx: &CallContext,
        tool_name: &str,
        input: ToolInput,
    ) -> Result<ToolOutput> {
        self.ensure_open()?;

        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| Error::tool_not_found(tool_name))?;

        if self.config.validate_input {
            tool.schema().validate(&input)?;
        }

        let call_ctx = if ctx.deadline().is_some() {
            ctx.child()
        } else {
            ctx.with_timeout(self.config.default_timeout)
        };

        let timer = Timer::start();
        self.in_flight.inc();
        let result = call_ctx.run(tool.execute(&call_ctx, input)).await;
        self.in_flight.dec();

        let duration_ms = timer.elapsed_ms();
        self.requests.inc();
        self.total_duration_ms.inc_by(duration_ms);

        match result {
            Ok(output) => {
                debug!(
                    tool = %tool_name,
                    success = output.success,
                    duration_ms,
                    "Tool execution completed"
                );
                Ok(output)
            }
            Err(e) => {
                self.errors.inc();
                let e = Error::from(e);
                match &e {
                    Error::Timeout(_) | Error::Cancelled => {
                        warn!(tool = %tool_name, duration_ms, error = %e, "Tool execution interrupted");
                    }
                    _ => {
                        error!(tool = %tool_name, duration_ms, error = %e, "Tool execution failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// Health summary
    #[must_use]
    pub fn health(&self) -> Map<String, Value> {
        let requests = self.requests.get();
        let average_latency_ms = if requests == 0 {
            0.0
        } else {
            self.total_duration_ms.get() as f64 / requests as f64
        };
        let closed = self.is_closed();

        let mut health = Map::new();
        health.insert(
            "status".into(),
            json!(if closed { "closed" } else { "healthy" }),
        );
        health.insert("closed".into(), json!(closed));
        health.insert("tools".into(), json!(self.registry.len()));
        health.insert("requests".into(), json!(requests));
        health.insert("errors".into(), json!(self.errors.get()));
        health.insert("in_flight".into(), json!(self.in_flight.get()));
        health.insert("average_latency_ms".into(), json!(average_latency_ms));
        health
    }

    /// Whether close has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reject further calls. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(requests = self.requests.get(), "Orchestrator closed");
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed("orchestrator"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ToolDispatcher for Orchestrator {
    async fn execute(
        &self,
        ctx: &CallContext,
        tool_name: &str,
        input: ToolInput,
    ) -> Result<ToolOutput> {
        Orchestrator::execute(self, ctx, tool_name, input).await
    }
}
