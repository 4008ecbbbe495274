//! Registry - Tool contract and registration
//!
//! This module defines the contract every tool implements and a concurrent
//! registry keyed by tool name. Tool arguments travel as loose JSON maps;
//! tools convert them to typed structs at the boundary with
//! [`ToolInput::parse_data`].

use crate::context::CallContext;
use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

/// JSON schema describing a tool's input and output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// JSON schema for the input data
    pub parameters: Value,
    /// JSON schema for the output data, if documented
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl Default for ToolSchema {
    fn default() -> Self {
        Self {
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            output: None,
        }
    }
}

impl ToolSchema {
    /// Create an empty object schema
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the input parameters schema
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the output schema
    #[must_use]
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Names listed under `required`
    #[must_use]
    pub fn required_fields(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Check that every required field is present and non-null
    pub fn validate(&self, input: &ToolInput) -> Result<()> {
        let missing: Vec<&str> = self
            .required_fields()
            .into_iter()
            .filter(|field| input.data.get(*field).map_or(true, Value::is_null))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

/// Input passed to a tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInput {
    /// Session the call belongs to
    #[serde(default)]
    pub session_id: String,
    /// Tool arguments
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Ambient context (workflow variables, caller metadata)
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl ToolInput {
    /// Create an empty input for a session
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// Replace the argument map
    #[must_use]
    pub fn with_data_map(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Set a single argument
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Set a single context entry
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Deserialize the argument map into a typed struct
    pub fn parse_data<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.data.clone()))
            .map_err(|e| Error::InvalidInput(e.to_string()))
    }
}

/// Output returned by a tool
///
/// A tool reports its own failures with `success: false`; `Err` is reserved
/// for failures of the call itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the tool considers the call successful
    pub success: bool,
    /// Result data
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Error message if the tool failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolOutput {
    /// Create a successful output
    #[must_use]
    pub fn ok(data: Map<String, Value>) -> Self {
        Self {
            success: true,
            data,
            ..Default::default()
        }
    }

    /// Create a failed output
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Add a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Serializable summary of a registered tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Input/output schema
    pub schema: ToolSchema,
}

/// Trait for tool implementations
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Input/output schema
    fn schema(&self) -> &ToolSchema;

    /// Execute the tool
    async fn execute(&self, ctx: &CallContext, input: ToolInput) -> Result<ToolOutput>;

    /// Summary used for listings
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            schema: self.schema().clone(),
        }
    }
}

/// Concurrent registry of tools keyed by name
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is taken.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        match self.tools.entry(name.clone()) {
            Entry::Occupied(_) => Err(Error::AlreadyRegistered(name)),
            Entry::Vacant(slot) => {
                slot.insert(tool);
                info!(tool = %name, "Tool registered");
                Ok(())
            }
        }
    }

    /// Remove a tool. Fails if the name is unknown.
    pub fn unregister(&self, name: &str) -> Result<()> {
        match self.tools.remove(name) {
            Some(_) => {
                info!(tool = %name, "Tool unregistered");
                Ok(())
            }
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    /// Get a tool by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Get a tool definition by name
    #[must_use]
    pub fn get_definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.get(name).map(|entry| entry.value().definition())
    }

    /// Check if a tool exists
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tool names (unordered)
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.tools.iter().map(|entry| entry.key().clone()).collect()
    }

    /// List all tool definitions (unordered)
    #[must_use]
    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|entry| entry.value().definition())
            .collect()
    }

    /// Get tool count
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct NamedTool {
        name: &'static str,
        description: &'static str,
        schema: ToolSchema,
    }

    impl NamedTool {
        fn new(name: &'static str, description: &'static str) -> Self {
            Self {
                name,
                description,
                schema: ToolSchema::new().with_parameters(serde_json::json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                })),
            }
        }
    }

    #[async_trait::async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            self.description
        }

        fn schema(&self) -> &ToolSchema {
            &self.schema
        }

        async fn execute(&self, _ctx: &CallContext, input: ToolInput) -> Result<ToolOutput> {
            Ok(ToolOutput::ok(input.data))
        }
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(NamedTool::new("analyze", "first")))
            .unwrap();

        let err = registry
            .register(Arc::new(NamedTool::new("analyze", "second")))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(ref n) if n == "analyze"));

        let tool = registry.get("analyze").unwrap();
        assert_eq!(tool.description(), "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(NamedTool::new("build", "b")))
            .unwrap();

        registry.unregister("build").unwrap();
        assert!(!registry.has("build"));
        assert!(registry.is_empty());
        assert!(matches!(
            registry.unregister("build"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_list() {
        let registry = ToolRegistry::new();
        for name in ["a", "b", "c"] {
            registry
                .register(Arc::new(NamedTool::new(name, "tool")))
                .unwrap();
        }

        let names: HashSet<String> = registry.list().into_iter().collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains("b"));
        assert_eq!(registry.list_definitions().len(), 3);
        assert_eq!(registry.get_definition("c").unwrap().description, "tool");
    }

    #[test]
    fn test_concurrent_registration_single_winner() {
        let registry = Arc::new(ToolRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .register(Arc::new(NamedTool::new("race", "r")))
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_schema_validation() {
        let tool = NamedTool::new("read", "r");
        let ok = ToolInput::new("s1").with_data("path", "/tmp/x");
        assert!(tool.schema().validate(&ok).is_ok());

        let missing = ToolInput::new("s1").with_data("path", Value::Null);
        let err = tool.schema().validate(&missing).unwrap_err();
        assert!(err.to_string().contains("path"));
    }

    #[test]
    fn test_parse_data() {
        #[derive(Deserialize)]
        struct Args {
            path: String,
            #[serde(default)]
            depth: u32,
        }

        let input = ToolInput::new("s1").with_data("path", "/repo");
        let args: Args = input.parse_data().unwrap();
        assert_eq!(args.path, "/repo");
        assert_eq!(args.depth, 0);

        let bad = ToolInput::new("s1").with_data("path", 42);
        assert!(matches!(
            bad.parse_data::<Args>(),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_tool_output() {
        let ok = ToolOutput::ok(Map::new()).with_metadata("attempts", 1);
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert_eq!(ok.metadata["attempts"], 1);

        let failed = ToolOutput::failure("boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
