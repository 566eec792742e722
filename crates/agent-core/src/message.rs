//! Conversation Messages
//!
//! Canonical message format shared by every provider, and the append-only
//! conversation log that feeds each model round.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::tool::ToolCall;

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content
    pub content: String,

    /// Tool name (for tool messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Call this message answers (for tool messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Calls requested by the model (for assistant messages)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message that requests tool calls
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a tool result message answering `tool_call_id`
    pub fn tool(
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.name = Some(name.into());
        msg
    }

    /// Whether this assistant message asked for tools
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Append-only conversation log.
///
/// Messages can be added and the whole log can be cleared, but nothing
/// already appended can be edited or removed individually.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    ///
    /// A tool message must answer one of the calls made by the nearest
    /// preceding assistant message; otherwise it is rejected and the log is
    /// left untouched.
    pub fn push(&mut self, message: Message) -> Result<()> {
        if message.role == Role::Tool {
            self.check_tool_reply(&message)?;
        }
        self.messages.push(message);
        Ok(())
    }

    fn check_tool_reply(&self, message: &Message) -> Result<()> {
        let id = message.tool_call_id.as_deref().ok_or_else(|| {
            AgentError::Conversation("tool message without tool_call_id".into())
        })?;

        let assistant = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .ok_or_else(|| {
                AgentError::Conversation(format!(
                    "tool result '{}' has no preceding assistant message",
                    id
                ))
            })?;

        // Only tool messages may sit between the assistant turn and this reply.
        let interleaved = self
            .messages
            .iter()
            .rev()
            .take_while(|m| m.role != Role::Assistant)
            .any(|m| m.role != Role::Tool);
        if interleaved {
            return Err(AgentError::Conversation(format!(
                "tool result '{}' does not immediately follow its assistant message",
                id
            )));
        }

        if !assistant.tool_calls.iter().any(|call| call.id == id) {
            return Err(AgentError::Conversation(format!(
                "tool result '{}' matches no call of the preceding assistant message",
                id
            )));
        }
        Ok(())
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Drop the whole history
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
