//! Builtins - Built-in tools for Conduit
//!
//! - echo: returns its input data unchanged
//! - sleep: waits for a duration, honouring cancellation

mod echo;
mod sleep;

pub use echo::EchoTool;
pub use sleep::SleepTool;

use crate::error::Result;
use crate::registry::ToolRegistry;
use std::sync::Arc;

/// Register all built-in tools with the registry
pub fn register_builtins(registry: &ToolRegistry) -> Result<()> {
    registry.register(Arc::new(EchoTool::new()))?;
    registry.register(Arc::new(SleepTool::new()))?;
    Ok(())
}
