//! Anthropic Messages adapter
//!
//! Anthropic streams typed events and sends one content block at a time, so
//! a tool call is complete as soon as its block stops. There is no `tool`
//! role: results travel back as `tool_result` blocks inside a user message.

use agent_core::{
    accumulator::ToolCallAccumulator,
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{
        Completion, EventDecoder, FinishReason, ProviderAdapter, ProviderKind, Request,
        StreamEvent, TokenUsage,
    },
    sse::{parse_line, SseLine},
    tool::{parse_arguments, ToolCall, ToolDefinition},
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::error_summary;

/// Protocol version sent with every request
pub const API_VERSION: &str = "2023-06-01";

/// Wire format of the Anthropic Messages API
#[derive(Clone, Copy, Debug, Default)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Top-level system text: the override (or the first system message)
    /// followed by any further system messages.
    fn system_text(system: Option<&str>, messages: &[Message]) -> Option<String> {
        let mut parts: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if let Some(prompt) = system {
            match parts.first_mut() {
                Some(first) => *first = prompt,
                None => parts.push(prompt),
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    fn encode_messages(messages: &[Message]) -> Vec<Value> {
        let mut encoded: Vec<Value> = Vec::with_capacity(messages.len());
        let mut open_results = false;

        for msg in messages {
            match msg.role {
                Role::System => continue,
                Role::Tool => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.as_deref().unwrap_or_default(),
                        "content": msg.content,
                    });
                    if open_results {
                        if let Some(Value::Array(blocks)) =
                            encoded.last_mut().and_then(|last| last.get_mut("content"))
                        {
                            blocks.push(block);
                            continue;
                        }
                    }
                    encoded.push(json!({"role": "user", "content": [block]}));
                    open_results = true;
                    continue;
                }
                Role::User => encoded.push(json!({"role": "user", "content": msg.content})),
                Role::Assistant if msg.has_tool_calls() => {
                    let mut blocks = Vec::with_capacity(msg.tool_calls.len() + 1);
                    if !msg.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        let input = parse_arguments(&call.arguments).unwrap_or_else(|e| {
                            tracing::warn!(
                                tool = %call.name,
                                error = %e,
                                "tool arguments are not JSON, sending empty input"
                            );
                            json!({})
                        });
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": input,
                        }));
                    }
                    encoded.push(json!({"role": "assistant", "content": blocks}));
                }
                Role::Assistant if msg.content.trim().is_empty() => {
                    tracing::debug!("skipping empty assistant message");
                    continue;
                }
                Role::Assistant => {
                    encoded.push(json!({"role": "assistant", "content": msg.content}));
                }
            }
            open_results = false;
        }
        encoded
    }

    fn encode_tool(def: &ToolDefinition) -> Value {
        json!({
            "name": def.name,
            "description": def.description,
            "input_schema": def.json_schema(),
        })
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn endpoint(&self) -> &'static str {
        "/v1/messages"
    }

    fn headers(&self, api_key: &str) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", api_key.to_string()),
            ("anthropic-version", API_VERSION.to_string()),
        ]
    }

    fn encode_request(&self, request: &Request) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": request.stream,
            "messages": Self::encode_messages(&request.messages),
        });
        if let Some(system) = Self::system_text(request.system.as_deref(), &request.messages) {
            body["system"] = Value::String(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = request.tools.iter().map(Self::encode_tool).collect();
        }
        body
    }

    fn decode_completion(&self, body: &Value) -> Result<Completion> {
        if body.get("error").is_some() {
            let summary = error_summary(body).unwrap_or_else(|| body.to_string());
            return Err(AgentError::Provider(summary));
        }

        let response: MessageResponse = serde_json::from_value(body.clone())
            .map_err(|e| AgentError::Provider(format!("malformed completion: {}", e)))?;

        let mut completion = Completion {
            model: response.model.unwrap_or_default(),
            finish_reason: response.stop_reason.as_deref().map(FinishReason::from_provider),
            usage: response.usage.map(WireUsage::into_usage),
            ..Completion::default()
        };
        for block in response.content {
            match block {
                ResponseBlock::Text { text } => completion.content.push_str(&text),
                ResponseBlock::ToolUse { id, name, input } => {
                    completion.tool_calls.push(ToolCall::new(id, name, input.to_string()));
                }
                ResponseBlock::Other => {}
            }
        }
        Ok(completion)
    }

    fn event_decoder(&self) -> Box<dyn EventDecoder> {
        Box::new(AnthropicDecoder::default())
    }
}

/// Per-round stream decoder
#[derive(Debug, Default)]
pub struct AnthropicDecoder {
    tool_calls: ToolCallAccumulator,
    block_index: Option<usize>,
    done: bool,
}

impl AnthropicDecoder {
    fn decode_payload(&mut self, payload: &str) -> Result<Vec<StreamEvent>> {
        let event: WireEvent = serde_json::from_str(payload)
            .map_err(|e| AgentError::Parse(format!("unexpected stream event: {}", e)))?;

        let events = match event {
            WireEvent::MessageStart { message } => message
                .usage
                .map(|usage| vec![StreamEvent::Usage(usage.into_usage())])
                .unwrap_or_default(),
            WireEvent::ContentBlockStart { index, content_block } => match content_block {
                StartBlock::ToolUse { id, name } => {
                    let mut events = Vec::new();
                    if let Some(previous) = self.tool_calls.begin_block(Some(&id), Some(&name)) {
                        tracing::debug!(id = %previous.id, "tool block closed by a new block");
                        events.push(StreamEvent::ToolCallComplete(previous));
                    }
                    self.block_index = Some(index);
                    events.push(StreamEvent::ToolCallDelta {
                        index: Some(index),
                        id: Some(id),
                        name: Some(name),
                        arguments_fragment: None,
                    });
                    events
                }
                StartBlock::Text { text } if !text.is_empty() => vec![StreamEvent::TextDelta(text)],
                _ => Vec::new(),
            },
            WireEvent::ContentBlockDelta { delta } => match delta {
                BlockDelta::TextDelta { text } => vec![StreamEvent::TextDelta(text)],
                BlockDelta::InputJsonDelta { partial_json } => {
                    if self.tool_calls.append_to_block(&partial_json) {
                        vec![StreamEvent::ToolCallDelta {
                            index: self.block_index,
                            id: None,
                            name: None,
                            arguments_fragment: Some(partial_json),
                        }]
                    } else {
                        tracing::debug!("input_json_delta outside a tool block");
                        Vec::new()
                    }
                }
                BlockDelta::Other => Vec::new(),
            },
            WireEvent::ContentBlockStop => {
                self.block_index = None;
                self.tool_calls
                    .finish_block()
                    .map(|call| vec![StreamEvent::ToolCallComplete(call)])
                    .unwrap_or_default()
            }
            WireEvent::MessageDelta { delta, usage } => {
                let mut events = Vec::new();
                if let Some(reason) = delta.stop_reason {
                    events.push(StreamEvent::Finish(FinishReason::from_provider(&reason)));
                }
                if let Some(usage) = usage {
                    events.push(StreamEvent::Usage(usage.into_usage()));
                }
                events
            }
            WireEvent::MessageStop => self.complete(),
            WireEvent::Error { error } => {
                vec![StreamEvent::Error(error.message.unwrap_or(error.kind))]
            }
            WireEvent::Ping | WireEvent::Unknown => Vec::new(),
        };
        Ok(events)
    }

    fn complete(&mut self) -> Vec<StreamEvent> {
        let mut events: Vec<StreamEvent> = self
            .tool_calls
            .finish_all()
            .into_iter()
            .map(StreamEvent::ToolCallComplete)
            .collect();
        events.push(StreamEvent::Done);
        self.done = true;
        events
    }
}

impl EventDecoder for AnthropicDecoder {
    fn decode_line(&mut self, line: &str) -> Result<Vec<StreamEvent>> {
        if self.done {
            return Ok(Vec::new());
        }
        match parse_line(line) {
            // The payload's `type` repeats the event name.
            SseLine::Data(payload) => self.decode_payload(payload.trim()),
            SseLine::Unknown(other) => {
                Err(AgentError::Parse(format!("unexpected SSE line: {}", other)))
            }
            _ => Ok(Vec::new()),
        }
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        tracing::debug!("stream ended without message_stop");
        self.complete()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    ContentBlockStop,
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: WireError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(rename = "type", default)]
    kind: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl WireUsage {
    fn into_usage(self) -> TokenUsage {
        TokenUsage::new(self.input_tokens, self.output_tokens)
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    model: Option<String>,
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Other,
}
