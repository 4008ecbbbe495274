//! Sleep Tool
//!
//! Waits for `duration_ms` milliseconds. The wait ends early, with an error,
//! when the call context is cancelled or its deadline passes.

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::registry::{Tool, ToolInput, ToolOutput, ToolSchema};
use serde::Deserialize;
use serde_json::Map;
use std::time::Duration;

/// Upper bound on a single sleep
const MAX_SLEEP_MS: u64 = 60 * 60 * 1000;

/// Sleep tool
pub struct SleepTool {
    schema: ToolSchema,
}

#[derive(Debug, Deserialize)]
struct SleepInput {
    duration_ms: u64,
}

impl SleepTool {
    /// Create a new sleep tool
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new().with_parameters(serde_json::json!({
                "type": "object",
                "properties": {
                    "duration_ms": {
                        "type": "integer",
                        "description": "How long to wait, in milliseconds"
                    }
                },
                "required": ["duration_ms"]
            })),
        }
    }
}

impl Default for SleepTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Wait for the given number of milliseconds"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, ctx: &CallContext, input: ToolInput) -> Result<ToolOutput> {
        let args: SleepInput = input.parse_data()?;
        if args.duration_ms > MAX_SLEEP_MS {
            return Err(Error::InvalidInput(format!(
                "duration_ms must be at most {}",
                MAX_SLEEP_MS
            )));
        }

        ctx.run(async {
            tokio::time::sleep(Duration::from_millis(args.duration_ms)).await;
            Ok(())
        })
        .await?;

        let mut data = Map::new();
        data.insert("slept_ms".to_string(), args.duration_ms.into());
        Ok(ToolOutput::ok(data))
    }
}
