//! Error types for conduit-tools

use thiserror::Error;

/// Tool error type
#[derive(Debug, Error)]
pub enum Error {
    /// Tool not found
    #[error("tool not found: {0}")]
    NotFound(String),

    /// A tool with the same name is already registered
    #[error("tool already registered: {0}")]
    AlreadyRegistered(String),

    /// Tool execution failed
    #[error("execution failed: {0}")]
    Execution(String),

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Deadline exceeded
    #[error("execution timeout after {0}ms")]
    Timeout(u64),

    /// The call context was cancelled
    #[error("execution cancelled")]
    Cancelled,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
