//! Built-in Tools

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::exec::{truncate_output, CommandExecutor, CommandRequest, DEFAULT_TIMEOUT_MS};
use crate::tool::{ParameterSchema, Tool, ToolDefinition, ToolRegistry, ToolResult};

/// Registry holding every built-in tool, sharing one executor
pub fn default_registry(executor: CommandExecutor) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ShellTool::new(executor.clone()));
    registry.register(ReadFileTool::new(executor.config().max_output_bytes));
    registry.register(WriteFileTool);
    registry.register(DateTimeTool);
    registry
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::ToolValidation(format!("'{}' must be a string", key)))
}

/// Shell tool - runs a command line
pub struct ShellTool {
    executor: CommandExecutor,
}

impl ShellTool {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "shell".into(),
            description: "Run a shell command and return its combined stdout and stderr".into(),
            parameters: vec![
                ParameterSchema::new("command", "string", "The command line to execute").required(),
                ParameterSchema::new("stdin", "string", "Text to pass to the command on stdin"),
                ParameterSchema::new("timeout_ms", "integer", "Timeout in milliseconds")
                    .with_default(json!(DEFAULT_TIMEOUT_MS)),
            ],
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolResult> {
        let request: CommandRequest = serde_json::from_value(arguments.clone())
            .map_err(|e| AgentError::ToolValidation(e.to_string()))?;
        Ok(self.executor.run(&request).await)
    }
}

/// Read file tool
pub struct ReadFileTool {
    max_bytes: usize,
}

impl ReadFileTool {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".into(),
            description: "Read a UTF-8 text file".into(),
            parameters: vec![
                ParameterSchema::new("path", "string", "Path of the file to read").required(),
            ],
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolResult> {
        let path = required_str(arguments, "path")?;
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                Ok(ToolResult::success(truncate_output(text, self.max_bytes)))
            }
            Err(e) => Err(AgentError::Tool(format!("cannot read {}: {}", path, e))),
        }
    }
}

/// Write file tool
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".into(),
            description: "Create or overwrite a text file".into(),
            parameters: vec![
                ParameterSchema::new("path", "string", "Path of the file to write").required(),
                ParameterSchema::new("content", "string", "Full new file content").required(),
            ],
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolResult> {
        let path = required_str(arguments, "path")?;
        let content = required_str(arguments, "content")?;
        match tokio::fs::write(path, content).await {
            Ok(()) => Ok(ToolResult::success(format!("wrote {} bytes to {}", content.len(), path))),
            Err(e) => Err(AgentError::Tool(format!("cannot write {}: {}", path, e))),
        }
    }
}

/// DateTime tool - returns current time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "datetime".into(),
            description: "Get the current date and time (UTC)".into(),
            parameters: vec![
                ParameterSchema::new("format", "string", "Output format: 'iso', 'human', or 'unix'")
                    .with_default(json!("human"))
                    .with_enum(vec![json!("iso"), json!("human"), json!("unix")]),
            ],
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolResult> {
        let format = arguments
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or("human");

        let now = chrono::Utc::now();

        let output = match format {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        };

        Ok(ToolResult::success(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolCall;

    #[test]
    fn test_default_registry() {
        let registry = default_registry(CommandExecutor::default());
        assert_eq!(registry.names(), vec!["datetime", "read_file", "shell", "write_file"]);
    }

    #[tokio::test]
    async fn test_datetime_unix() {
        let result = DateTimeTool.execute(&json!({"format": "unix"})).await.unwrap();
        assert!(result.success);
        assert!(result.output.parse::<i64>().is_ok());
    }

    #[tokio::test]
    async fn test_write_then_read_file() {
        let path = std::env::temp_dir().join(format!("agent-core-{}.txt", uuid::Uuid::new_v4()));
        let path_str = path.to_string_lossy().to_string();
        let registry = default_registry(CommandExecutor::default());

        let args = json!({"path": path_str, "content": "line one\n"}).to_string();
        let written = registry.execute(&ToolCall::new("w", "write_file", args)).await;
        assert!(written.success, "{:?}", written);

        let args = json!({"path": path_str}).to_string();
        let read = registry.execute(&ToolCall::new("r", "read_file", args)).await;
        assert_eq!(read.output, "line one\n");

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_read_missing_file_is_tool_error() {
        let err = ReadFileTool::new(100)
            .execute(&json!({"path": "/definitely/not/here.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Tool(_)));

        let registry = default_registry(CommandExecutor::default());
        let args = json!({"path": "/definitely/not/here.txt"}).to_string();
        let result = registry.execute(&ToolCall::new("r", "read_file", args)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Tool error: cannot read"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_tool_passes_stdin_and_timeout() {
        let registry = default_registry(CommandExecutor::default());
        let args = json!({"command": "tr a-z A-Z", "stdin": "abc", "timeout_ms": 5000}).to_string();
        let result = registry.execute(&ToolCall::new("s", "shell", args)).await;
        assert!(result.success);
        assert_eq!(result.output, "ABC");
    }
}
