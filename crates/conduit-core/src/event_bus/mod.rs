//! EventBus - asynchronous pub/sub for tool, workflow and job lifecycle events.
//!
//! Publishing never blocks: events go into a bounded channel drained by a
//! fixed worker pool, and are dropped with a warning when the channel is full.
//! A bounded ring buffer keeps recent events for inspection.

/// Core event bus implementation (worker pool).
pub mod bus;
/// Event, subscription and configuration types.
pub mod types;

pub use bus::EventBus;
pub use types::{
    handler_fn, payload, Event, EventBusConfig, EventBusStats, EventHandler, EventType,
    HandlerFuture, SubscriptionStats,
};
