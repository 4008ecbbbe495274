use crate::utils::{CircuitBreakerConfig, RetryConfig};
use chrono::{DateTime, Utc};
use conduit_tools::{ToolInput, ToolOutput};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::time::Duration;

/// A tool call routed through the communication manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Request identifier, assigned when empty
    #[serde(default)]
    pub id: String,
    /// Tool to invoke
    pub tool_name: String,
    /// Session the call belongs to
    #[serde(default)]
    pub session_id: String,
    /// Tool arguments
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Correlation identifier, assigned when empty
    #[serde(default)]
    pub correlation_id: String,
    /// Correlation of the request that caused this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Overall budget for the call including retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Ambient context passed to the tool
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl ToolRequest {
    /// Create a request for a tool
    #[must_use]
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            tool_name: tool_name.into(),
            session_id: String::new(),
            parameters: Map::new(),
            correlation_id: String::new(),
            parent_id: None,
            timeout_ms: None,
            timestamp: Utc::now(),
            context: Map::new(),
        }
    }

    /// Set the session
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Set a single argument
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Replace the argument map
    #[must_use]
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Use an explicit correlation id
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Link to a parent correlation
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Bound the whole call, retries included
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set a context entry
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub(crate) fn to_input(&self) -> ToolInput {
        ToolInput {
            session_id: self.session_id.clone(),
            data: self.parameters.clone(),
            context: self.context.clone(),
        }
    }
}

/// Result of a routed tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Response identifier
    pub id: String,
    /// Tool that ran
    pub tool_name: String,
    /// Session the call belonged to
    pub session_id: String,
    /// Correlation identifier
    pub correlation_id: String,
    /// Whether the tool reported success
    pub success: bool,
    /// Tool result data
    pub result: Map<String, Value>,
    /// Tool-reported error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Total time including retries
    pub duration_ms: u64,
    /// Attempts made
    pub attempts: u32,
    /// Completion time
    pub timestamp: DateTime<Utc>,
    /// Tool metadata
    pub metadata: Map<String, Value>,
}

impl ToolResponse {
    pub(crate) fn from_output(
        request: &ToolRequest,
        output: ToolOutput,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool_name: request.tool_name.clone(),
            session_id: request.session_id.clone(),
            correlation_id: request.correlation_id.clone(),
            success: output.success,
            result: output.data,
            error: output.error,
            duration_ms: duration.as_millis() as u64,
            attempts,
            timestamp: Utc::now(),
            metadata: output.metadata,
        }
    }
}

/// Lifecycle of a correlated request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStatus {
    /// In flight
    Pending,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Denied by the tool's circuit breaker
    CircuitBreakerOpen,
}

impl std::fmt::Display for CorrelationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::CircuitBreakerOpen => write!(f, "circuit_breaker_open"),
        }
    }
}

/// Tracking record for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCorrelation {
    /// Correlation identifier
    pub id: String,
    /// Correlation at the root of the chain
    pub root_request_id: String,
    /// Direct parent, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Session of the request
    pub session_id: String,
    /// When tracking began
    pub start_time: DateTime<Utc>,
    /// When the request finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Current status
    pub status: CorrelationStatus,
    /// Tools invoked under this correlation, in order
    pub tool_chain: Vec<String>,
    /// Request context
    pub context: Map<String, Value>,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Per tool request statistics
#[derive(Debug, Clone, Serialize)]
pub struct RequestMetrics {
    /// Tool name
    pub tool_name: String,
    /// Completed requests
    pub total_requests: u64,
    /// Requests that returned a response
    pub successful_requests: u64,
    /// Requests that returned an error
    pub failed_requests: u64,
    /// Mean latency over the rolling window
    #[serde(rename = "average_latency_ms", serialize_with = "serialize_millis")]
    pub average_latency: Duration,
    /// 95th percentile latency over the rolling window
    #[serde(rename = "p95_latency_ms", serialize_with = "serialize_millis")]
    pub p95_latency: Duration,
    /// `failed_requests / total_requests`
    pub error_rate: f64,
    /// When the last request finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_request_time: Option<DateTime<Utc>>,
}

impl RequestMetrics {
    pub(crate) fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_latency: Duration::ZERO,
            p95_latency: Duration::ZERO,
            error_rate: 0.0,
            last_request_time: None,
        }
    }
}

/// Communication manager configuration
#[derive(Debug, Clone)]
pub struct CommunicationConfig {
    /// Retry policy for transient errors
    pub retry: RetryConfig,
    /// Settings for breakers created on first use
    pub breaker: CircuitBreakerConfig,
    /// Latency samples kept per tool
    pub metrics_window: usize,
    /// Correlations kept before the least recently used is evicted
    pub max_correlations: usize,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            metrics_window: 100,
            max_correlations: 10_000,
        }
    }
}

impl CommunicationConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the breaker settings
    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Set the latency window size
    #[must_use]
    pub fn with_metrics_window(mut self, window: usize) -> Self {
        self.metrics_window = window.max(1);
        self
    }

    /// Set the correlation capacity
    #[must_use]
    pub fn with_max_correlations(mut self, max: usize) -> Self {
        self.max_correlations = max.max(1);
        self
    }
}
