//! Tool trait, registry and execution

use async_trait::async_trait;
use chorus_ai::{ToolCall, ToolExecutionResult, ToolSpec};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with validated parameters
    async fn execute(&self, parameters: serde_json::Value) -> ToolExecutionResult;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Declaration sent to providers for a tool
pub fn to_spec(tool: &dyn Tool) -> ToolSpec {
    ToolSpec::new(tool.name(), tool.description(), tool.parameters_schema())
}

/// Resolves a detected tool call to a result.
///
/// The loop does not care whether the call runs in-process or is handed to
/// someone else and answered later.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall, preceding_text: &str) -> ToolExecutionResult;
}

struct RegisteredTool {
    tool: BoxedTool,
    validator: Option<Arc<jsonschema::Validator>>,
}

/// Explicit set of tools available to requests
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&self, tool: BoxedTool) {
        let schema = tool.parameters_schema();
        let validator = match jsonschema::validator_for(&schema) {
            Ok(validator) => Some(Arc::new(validator)),
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
                None
            }
        };
        self.tools
            .write()
            .insert(tool.name().to_string(), RegisteredTool { tool, validator });
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<BoxedTool> {
        self.tools.read().get(name).map(|t| t.tool.clone())
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Declarations for every registered tool, sorted by name
    pub fn specs(&self) -> Vec<ToolSpec> {
        let tools = self.tools.read();
        let mut specs: Vec<ToolSpec> = tools.values().map(|t| to_spec(t.tool.as_ref())).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Check parameters against the tool's schema
    pub fn validate(&self, name: &str, parameters: &serde_json::Value) -> Result<()> {
        let tools = self.tools.read();
        let registered = tools
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;
        match registered
            .validator
            .as_ref()
            .and_then(|validator| validation_errors(parameters, validator))
        {
            Some(message) => Err(Error::InvalidToolParameters(message)),
            None => Ok(()),
        }
    }

    /// Validate and run a call. Lookup and validation failures become error
    /// results so the model can correct itself.
    pub async fn execute(&self, call: &ToolCall) -> ToolExecutionResult {
        if let Err(e) = self.validate(&call.tool_id, &call.parameters) {
            tracing::debug!("Rejecting tool call {} ({}): {}", call.id, call.tool_id, e);
            return ToolExecutionResult::error(e.to_string());
        }
        let Some(tool) = self.get(&call.tool_id) else {
            let error = Error::ToolNotFound(call.tool_id.clone());
            return ToolExecutionResult::error(error.to_string());
        };

        tracing::debug!("Executing tool {} for call {}", call.tool_id, call.id);
        tool.execute(call.parameters.clone()).await
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, call: &ToolCall, _preceding_text: &str) -> ToolExecutionResult {
        ToolRegistry::execute(self, call).await
    }
}

/// Returns `Some(error_message)` if validation fails
fn validation_errors(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_ai::Provider;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo a message"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            })
        }

        async fn execute(&self, parameters: serde_json::Value) -> ToolExecutionResult {
            ToolExecutionResult::success(parameters["message"].as_str().unwrap_or_default())
        }
    }

    fn call(tool: &str, parameters: serde_json::Value) -> ToolCall {
        ToolCall::new("c1", tool, parameters, Provider::OpenAI)
    }

    #[tokio::test]
    async fn test_execute_valid_call() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let result = registry.execute(&call("echo", json!({"message": "hi"}))).await;
        assert_eq!(result, ToolExecutionResult::success("hi"));
    }

    #[tokio::test]
    async fn test_invalid_parameters_become_error_result() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let result = registry.execute(&call("echo", json!({"message": 5}))).await;
        match result {
            ToolExecutionResult::Error { message, .. } => {
                assert!(message.starts_with("Tool argument validation failed"));
                assert!(message.contains("/message"));
            }
            other => panic!("expected error, got {:?}", other),
        }

        let result = registry.execute(&call("echo", json!({}))).await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let result = registry.execute(&call("missing", json!({}))).await;
        assert_eq!(result, ToolExecutionResult::error("Tool not found: missing"));
    }

    #[test]
    fn test_specs_and_unregister() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[0].parameters["required"][0], "message");

        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
        assert!(registry.names().is_empty());
    }
}
