//! Tool System
//!
//! Tools are registered at startup, advertised to the provider on every
//! round, and invoked by the agent loop with the JSON arguments the model
//! produced.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};

/// A complete tool invocation requested by the model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call ID
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments exactly as the model streamed them (JSON text)
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the arguments text. An empty string counts as `{}`.
    pub fn parsed_arguments(&self) -> Result<Value> {
        parse_arguments(&self.arguments)
    }
}

/// Parse raw tool arguments, treating blank input as an empty object
pub fn parse_arguments(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(raw)
        .map_err(|e| AgentError::Parse(format!("tool arguments are not valid JSON: {}", e)))
}

/// Result from tool execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether execution succeeded
    pub success: bool,

    /// Captured output
    pub output: String,

    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Failure that still carries whatever output was produced
    pub fn failure_with_output(error: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Render as the content of a tool message
    pub fn to_message_content(&self) -> String {
        if self.success {
            if self.output.is_empty() {
                return "(no output)".into();
            }
            return self.output.clone();
        }

        let error = self.error.as_deref().unwrap_or("tool failed");
        if self.output.is_empty() {
            format!("Error: {}", error)
        } else {
            format!("Error: {}\n{}", error, self.output)
        }
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, integer, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn new(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: false,
            default: None,
            enum_values: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Tool definition advertised to the provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

impl ToolDefinition {
    /// JSON Schema object for the parameters.
    ///
    /// Both provider encodings are derived from this one projection.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.param_type));
            prop.insert("description".into(), json!(param.description));
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), Value::Array(values.clone()));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's definition for function calling
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with parsed arguments
    async fn execute(&self, arguments: &Value) -> Result<ToolResult>;

    /// Validate arguments before execution (optional)
    fn validate(&self, arguments: &Value) -> Result<()> {
        let definition = self.definition();
        let object = arguments.as_object().ok_or_else(|| {
            AgentError::ToolValidation("arguments must be a JSON object".into())
        })?;

        for param in &definition.parameters {
            if param.required && !object.contains_key(&param.name) {
                return Err(AgentError::ToolValidation(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
        }

        Ok(())
    }
}

/// Registry for available tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let definition = tool.definition();
        if self.tools.insert(definition.name.clone(), tool).is_some() {
            tracing::warn!(tool = %definition.name, "replacing previously registered tool");
        }
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Execute a tool call.
    ///
    /// Never fails: lookup, argument and execution errors all come back as an
    /// unsuccessful `ToolResult` so the model can see and react to them.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match self.try_execute(call).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %call.name, id = %call.id, error = %e, "tool call failed");
                ToolResult::failure(e.to_string())
            }
        }
    }

    async fn try_execute(&self, call: &ToolCall) -> Result<ToolResult> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        let arguments = call.parsed_arguments()?;
        tool.validate(&arguments)?;

        tracing::debug!(tool = %call.name, id = %call.id, "executing tool");
        tool.execute(&arguments).await
    }

    /// Definitions of every registered tool, ordered by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "Echo the text back".into(),
                parameters: vec![
                    ParameterSchema::new("text", "string", "Text to echo").required(),
                    ParameterSchema::new("loud", "boolean", "Upper-case the text"),
                ],
            }
        }

        async fn execute(&self, arguments: &Value) -> Result<ToolResult> {
            let text = arguments["text"].as_str().unwrap_or_default();
            if arguments["loud"].as_bool() == Some(true) {
                return Ok(ToolResult::success(text.to_uppercase()));
            }
            Ok(ToolResult::success(text))
        }
    }

    #[test]
    fn test_json_schema_projects_required() {
        let schema = EchoTool.definition().json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["text"]["type"], "string");
        assert_eq!(schema["required"], json!(["text"]));
    }

    #[test]
    fn test_parse_arguments_blank_is_empty_object() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert_eq!(parse_arguments("  ").unwrap(), json!({}));
        assert!(parse_arguments("{\"a\":").is_err());
    }

    #[tokio::test]
    async fn test_tool_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("unknown").is_none());

        let ok = registry
            .execute(&ToolCall::new("c1", "echo", r#"{"text":"hi","loud":true}"#))
            .await;
        assert!(ok.success);
        assert_eq!(ok.output, "HI");
    }

    #[tokio::test]
    async fn test_registry_turns_errors_into_failed_results() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let missing = registry.execute(&ToolCall::new("c1", "nope", "{}")).await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("nope"));

        let invalid = registry.execute(&ToolCall::new("c2", "echo", "{}")).await;
        assert!(!invalid.success);
        assert!(invalid.error.unwrap().contains("text"));

        let garbled = registry.execute(&ToolCall::new("c3", "echo", "{\"text\"")).await;
        assert!(!garbled.success);
    }

    #[test]
    fn test_message_content_rendering() {
        assert_eq!(ToolResult::success("").to_message_content(), "(no output)");
        assert_eq!(ToolResult::failure("boom").to_message_content(), "Error: boom");
        assert_eq!(
            ToolResult::failure_with_output("exit 1", "partial").to_message_content(),
            "Error: exit 1\npartial"
        );
    }
}
