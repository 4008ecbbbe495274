//! Conduit Tools - Tool contract and registry
//!
//! This crate provides the tool side of the Conduit execution core:
//! - Registry: the `Tool` contract and a concurrent name-keyed registry
//! - Context: cancellation and deadline propagation for calls
//! - Builtins: small built-in tools (echo, sleep)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builtins;
pub mod context;
pub mod error;
pub mod registry;

pub use builtins::register_builtins;
pub use context::CallContext;
pub use error::{Error, Result};
pub use registry::{Tool, ToolDefinition, ToolInput, ToolOutput, ToolRegistry, ToolSchema};
