//! LLM Provider Abstraction
//!
//! Canonical request, completion and stream-event types, plus the two seams
//! every backend plugs into:
//!
//! - [`ProviderAdapter`] translates canonical requests to a wire format and
//!   decodes the provider's responses. It is pure: no I/O.
//! - [`LlmProvider`] is what the agent loop talks to. The runtime crate
//!   implements it once over HTTP for any adapter.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{GenerationOptions, LlmProvider, Request};
//!
//! let request = Request::new(&GenerationOptions::default(), messages);
//! let mut events = provider.complete_stream(&request).await?;
//! ```

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;
use crate::tool::{ToolCall, ToolDefinition};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4o-mini", "claude-3-5-sonnet-latest")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 4096 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Provider-agnostic chat request
#[derive(Clone, Debug)]
pub struct Request {
    pub model: String,

    /// System prompt; takes precedence over a system message in `messages`
    pub system: Option<String>,

    pub messages: Vec<Message>,

    pub tools: Vec<ToolDefinition>,

    pub max_tokens: u32,

    pub temperature: f32,

    pub stream: bool,
}

impl Request {
    pub fn new(options: &GenerationOptions, messages: Vec<Message>) -> Self {
        Self {
            model: options.model.clone(),
            system: None,
            messages,
            tools: Vec::new(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream: true,
        }
    }

    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Reason for completion finishing
///
/// Each provider's stop reasons are folded onto `stop`, `length` and
/// `tool_calls`; anything else is kept verbatim in `Other`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    /// Normalize a provider stop reason
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool_use" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Other(raw) => raw,
        }
    }
}

impl From<String> for FinishReason {
    fn from(raw: String) -> Self {
        Self::from_provider(&raw)
    }
}

impl From<FinishReason> for String {
    fn from(reason: FinishReason) -> Self {
        reason.as_str().to_string()
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Fold in a later report; non-zero fields win
    pub fn merge(&mut self, other: TokenUsage) {
        if other.prompt_tokens > 0 {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens > 0 {
            self.completion_tokens = other.completion_tokens;
        }
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
    }
}

/// Response from a non-streaming completion
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Model that generated this response
    pub model: String,

    /// Tool calls requested by the model
    pub tool_calls: Vec<ToolCall>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,
}

/// One decoded event from a streaming completion
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A piece of assistant text
    TextDelta(String),

    /// A fragment of a tool call still being streamed
    ToolCallDelta {
        index: Option<usize>,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: Option<String>,
    },

    /// A fully reassembled tool call
    ToolCallComplete(ToolCall),

    /// Normalized reason the round ended
    Finish(FinishReason),

    /// Token counts reported by the provider
    Usage(TokenUsage),

    /// End of stream
    Done,

    /// Error reported inside the stream
    Error(String),
}

/// Stream type for completion streaming
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// The closed set of supported wire protocols
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = crate::error::AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            other => Err(crate::error::AgentError::Config(format!(
                "unknown provider '{}', expected 'openai' or 'anthropic'",
                other
            ))),
        }
    }
}

/// Per-round decoder turning SSE lines into stream events.
///
/// A fresh decoder is created for every request; it owns the round's
/// tool-call accumulator and is discarded when the stream ends.
pub trait EventDecoder: Send {
    /// Decode one logical SSE line.
    ///
    /// An `Err` means the line was not understood; callers skip it.
    fn decode_line(&mut self, line: &str) -> Result<Vec<StreamEvent>>;

    /// The byte stream ended. Finalize pending tool calls and emit `Done`
    /// unless it was already emitted.
    fn finish(&mut self) -> Vec<StreamEvent>;
}

/// Wire-format translation for one provider
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Path appended to the base URL for chat requests
    fn endpoint(&self) -> &'static str;

    /// Authentication and protocol headers
    fn headers(&self, api_key: &str) -> Vec<(&'static str, String)>;

    /// Encode a canonical request as the provider's JSON body
    fn encode_request(&self, request: &Request) -> serde_json::Value;

    /// Decode a non-streaming response envelope
    fn decode_completion(&self, body: &serde_json::Value) -> Result<Completion>;

    /// Fresh decoder for one streaming response
    fn event_decoder(&self) -> Box<dyn EventDecoder>;
}

/// What the agent loop calls
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Generate a completion in one response
    async fn complete(&self, request: &Request) -> Result<Completion>;

    /// Generate a streaming completion
    async fn complete_stream(&self, request: &Request) -> Result<EventStream>;
}
