//! Echo Tool
//!
//! Returns the input data as output. Useful for wiring checks and workflow
//! smoke tests.

use crate::context::CallContext;
use crate::error::Result;
use crate::registry::{Tool, ToolInput, ToolOutput, ToolSchema};
use tracing::debug;

/// Echo tool
pub struct EchoTool {
    schema: ToolSchema,
}

impl EchoTool {
    /// Create a new echo tool
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new().with_parameters(serde_json::json!({
                "type": "object",
                "description": "Any object; returned unchanged",
                "properties": {},
                "required": []
            })),
        }
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the input data unchanged"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, _ctx: &CallContext, input: ToolInput) -> Result<ToolOutput> {
        debug!(session_id = %input.session_id, keys = input.data.len(), "echo");
        Ok(ToolOutput::ok(input.data).with_metadata("session_id", input.session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_returns_data() {
        let tool = EchoTool::new();
        let input = ToolInput::new("s1").with_data("greeting", "hello");
        let output = tool.execute(&CallContext::new(), input).await.unwrap();

        assert!(output.success);
        assert_eq!(output.data["greeting"], "hello");
        assert_eq!(output.metadata["session_id"], "s1");
    }
}
