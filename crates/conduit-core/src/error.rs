//! Error types for conduit-core
//!
//! Every error maps onto one of five kinds (see [`ErrorKind`]). Infrastructure
//! errors (not found, overload, closed) are never retried; execution errors
//! are retried only when their message looks transient.

use serde::Serialize;
use thiserror::Error;

/// Message fragments that mark an execution error as transient
pub const RETRYABLE_PATTERNS: [&str; 4] = ["timeout", "connection", "temporary", "unavailable"];

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown tool, job or subscription
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up ("tool", "job", ...)
        kind: &'static str,
        /// The identifier that missed
        id: String,
    },

    /// Malformed arguments or duplicate registration
    #[error("validation error: {0}")]
    Validation(String),

    /// Circuit breaker denied the call
    #[error("circuit breaker open for tool {0}")]
    CircuitOpen(String),

    /// Bounded job queue rejected a submission
    #[error("job queue is full")]
    QueueFull,

    /// Component has been shut down
    #[error("{0} is closed")]
    Closed(&'static str),

    /// Deadline exceeded during execution or retry wait
    #[error("execution timeout after {0}ms")]
    Timeout(u64),

    /// Caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Tool or job execution failed
    #[error("execution error: {0}")]
    Execution(String),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown tool/job/subscription
    NotFound,
    /// Malformed arguments, duplicate registration
    Validation,
    /// Circuit open, queue full, component closed
    Overload,
    /// Deadline exceeded or cancelled
    Timeout,
    /// Unexpected execution failure
    Internal,
}

impl Error {
    /// Shorthand for a missing tool
    #[must_use]
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "tool",
            id: name.into(),
        }
    }

    /// Shorthand for a missing job
    #[must_use]
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "job",
            id: id.into(),
        }
    }

    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::CircuitOpen(_) | Self::QueueFull | Self::Closed(_) => ErrorKind::Overload,
            Self::Timeout(_) | Self::Cancelled => ErrorKind::Timeout,
            Self::Execution(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a retry could plausibly succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Execution(_) | Self::Timeout(_) | Self::Internal(_) => {
                let message = self.to_string().to_lowercase();
                RETRYABLE_PATTERNS
                    .iter()
                    .any(|pattern| message.contains(pattern))
            }
            _ => false,
        }
    }
}

impl From<conduit_tools::Error> for Error {
    fn from(err: conduit_tools::Error) -> Self {
        use conduit_tools::Error as ToolError;
        match err {
            ToolError::NotFound(name) => Self::tool_not_found(name),
            ToolError::AlreadyRegistered(name) => {
                Self::Validation(format!("tool already registered: {}", name))
            }
            ToolError::InvalidInput(msg) => Self::Validation(msg),
            ToolError::Execution(msg) => Self::Execution(msg),
            ToolError::Timeout(ms) => Self::Timeout(ms),
            ToolError::Cancelled => Self::Cancelled,
        }
    }
}
