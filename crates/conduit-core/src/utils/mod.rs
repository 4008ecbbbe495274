//! Utility modules for conduit-core
//!
//! Provides common utilities:
//! - retry: Retry logic with exponential backoff
//! - circuit_breaker: Circuit breaker pattern for fault tolerance
//! - metrics: Lightweight metrics collection

mod circuit_breaker;
mod metrics;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use metrics::{Counter, Gauge, LatencyWindow, Timer};
pub use retry::{retry_with_backoff, RetryConfig, RetryError};
