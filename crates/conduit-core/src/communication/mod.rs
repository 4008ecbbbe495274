//! Communication Manager - correlated, retried and circuit-broken tool calls
//!
//! Wraps a [`crate::orchestrator::ToolDispatcher`] with:
//! - request correlation (bounded LRU, parent/child chains)
//! - a lazily created circuit breaker per tool
//! - retry with exponential backoff for transient errors
//! - per-tool request metrics over a rolling latency window
//! - lifecycle events on the shared [`crate::event_bus::EventBus`]

mod manager;
mod types;


pub use manager::CommunicationManager;
pub use types::{
    CommunicationConfig, CorrelationStatus, RequestCorrelation, RequestMetrics, ToolRequest,
    ToolResponse,
};
