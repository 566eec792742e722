//! OpenAI Chat Completions adapter
//!
//! Tool calls stream as indexed deltas; several calls may be in flight at
//! once and all of them are finalized when `data: [DONE]` arrives.

use agent_core::{
    accumulator::ToolCallAccumulator,
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{
        Completion, EventDecoder, FinishReason, ProviderAdapter, ProviderKind, Request,
        StreamEvent, TokenUsage,
    },
    sse::{parse_line, SseLine},
    tool::{ToolCall, ToolDefinition},
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::error_summary;

/// Wire format of the OpenAI Chat Completions API
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Message array with the system prompt first.
    ///
    /// `system` replaces the first system message, or is inserted ahead of
    /// everything when there is none.
    fn encode_messages(system: Option<&str>, messages: &[Message]) -> Vec<Value> {
        let mut encoded = Vec::with_capacity(messages.len() + 1);
        let mut system_pending = system;
        let has_system = messages.iter().any(|m| m.role == Role::System);

        if !has_system {
            if let Some(prompt) = system_pending.take() {
                encoded.push(json!({"role": "system", "content": prompt}));
            }
        }

        for msg in messages {
            let value = match msg.role {
                Role::System => {
                    let content = system_pending.take().unwrap_or(&msg.content);
                    json!({"role": "system", "content": content})
                }
                Role::User => json!({"role": "user", "content": msg.content}),
                Role::Assistant if msg.has_tool_calls() => {
                    let calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {"name": call.name, "arguments": call.arguments},
                            })
                        })
                        .collect();
                    let content = if msg.content.is_empty() {
                        Value::Null
                    } else {
                        Value::String(msg.content.clone())
                    };
                    json!({"role": "assistant", "content": content, "tool_calls": calls})
                }
                Role::Assistant => json!({"role": "assistant", "content": msg.content}),
                Role::Tool => json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id.as_deref().unwrap_or_default(),
                    "content": msg.content,
                }),
            };
            encoded.push(value);
        }
        encoded
    }

    fn encode_tool(def: &ToolDefinition) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": def.name,
                "description": def.description,
                "parameters": def.json_schema(),
            }
        })
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn endpoint(&self) -> &'static str {
        "/chat/completions"
    }

    fn headers(&self, api_key: &str) -> Vec<(&'static str, String)> {
        vec![("authorization", format!("Bearer {}", api_key))]
    }

    fn encode_request(&self, request: &Request) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": Self::encode_messages(request.system.as_deref(), &request.messages),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": request.stream,
        });
        if request.stream {
            body["stream_options"] = json!({"include_usage": true});
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

        let response: ChatResponse = serde_json::from_value(body.clone())
            .map_err(|e| AgentError::Provider(format!("malformed completion: {}", e)))?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Provider("completion contained no choices".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall::new(call.id, call.function.name, call.function.arguments))
            .collect();

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            model: response.model.unwrap_or_default(),
            tool_calls,
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_provider),
            usage: response.usage.map(WireUsage::into_usage),
        })
    }

    fn event_decoder(&self) -> Box<dyn EventDecoder> {
        Box::new(OpenAiDecoder::default())
    }
}

/// Per-round stream decoder
#[derive(Debug, Default)]
pub struct OpenAiDecoder {
    tool_calls: ToolCallAccumulator,
    done: bool,
}

impl OpenAiDecoder {
    fn decode_payload(&mut self, payload: &str) -> Result<Vec<StreamEvent>> {
        if payload == "[DONE]" {
            return Ok(self.complete());
        }

        let value: Value = serde_json::from_str(payload)
            .map_err(|e| AgentError::Parse(format!("stream payload is not JSON: {}", e)))?;
        if value.get("error").is_some() {
            let message = error_summary(&value).unwrap_or_else(|| payload.to_string());
            return Ok(vec![StreamEvent::Error(message)]);
        }

        let chunk: StreamChunk = serde_json::from_value(value)
            .map_err(|e| AgentError::Parse(format!("unexpected stream chunk: {}", e)))?;
        let mut events = Vec::new();

        for choice in chunk.choices {
            let delta = choice.delta.unwrap_or_default();
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta(text));
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                let index = self.tool_calls.apply_indexed(
                    call.index,
                    call.id.as_deref(),
                    function.name.as_deref(),
                    function.arguments.as_deref(),
                );
                events.push(StreamEvent::ToolCallDelta {
                    index: Some(index),
                    id: call.id,
                    name: function.name,
                    arguments_fragment: function.arguments,
                });
            }
            if let Some(reason) = choice.finish_reason {
                events.push(StreamEvent::Finish(FinishReason::from_provider(&reason)));
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(StreamEvent::Usage(usage.into_usage()));
        }
        Ok(events)
    }

    /// Flush reassembled calls and end the round
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

impl EventDecoder for OpenAiDecoder {
    fn decode_line(&mut self, line: &str) -> Result<Vec<StreamEvent>> {
        if self.done {
            return Ok(Vec::new());
        }
        match parse_line(line) {
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
        tracing::debug!("stream ended without [DONE]");
        self.complete()
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallChunk {
    index: Option<usize>,
    id: Option<String>,
    function: Option<FunctionChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionChunk {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl WireUsage {
    fn into_usage(self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, self.completion_tokens)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ResponseChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::provider::GenerationOptions;
    use agent_core::sse::decode_event_stream;
    use agent_core::tool::ParameterSchema;
    use futures::StreamExt;

    fn decode_all(lines: &[&str]) -> Vec<StreamEvent> {
        let mut decoder = OpenAiDecoder::default();
        let mut events = Vec::new();
        for line in lines {
            events.extend(decoder.decode_line(line).unwrap());
        }
        events.extend(decoder.finish());
        events
    }

    fn shell_definition() -> ToolDefinition {
        ToolDefinition {
            name: "shell".into(),
            description: "Run a command".into(),
            parameters: vec![
                ParameterSchema::new("command", "string", "Command line").required(),
                ParameterSchema::new("timeout_ms", "integer", "Timeout"),
            ],
        }
    }

    #[test]
    fn test_encode_request_shape() {
        let messages = vec![
            Message::user("list files"),
            Message::assistant_with_tools(
                "",
                vec![ToolCall::new("call_1", "shell", "{\"command\":\"ls\"}")],
            ),
            Message::tool("a.txt", "call_1", "shell"),
        ];
        let request = Request::new(&GenerationOptions::default(), messages)
            .with_system(Some("Be brief.".into()))
            .with_tools(vec![shell_definition()]);

        let body = OpenAiAdapter.encode_request(&request);
        let msgs = body["messages"].as_array().unwrap();

        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(msgs[2]["content"], Value::Null);
        assert_eq!(msgs[2]["tool_calls"][0]["function"]["arguments"], "{\"command\":\"ls\"}");
        assert_eq!(msgs[3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["parameters"]["required"], json!(["command"]));
        assert_eq!(body["stream"], false);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn test_system_override_replaces_existing() {
        let messages = vec![Message::system("old"), Message::user("hi")];
        let request = Request::new(&GenerationOptions::default(), messages)
            .with_system(Some("new".into()));

        let body = OpenAiAdapter.encode_request(&request);
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["content"], "new");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_fragmented_tool_call_stream() {
        let events = decode_all(&[
            r#"data: {"choices":[{"delta":{"role":"assistant","content":null,"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"shell"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"comman"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"d\":\"ls\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]);

        let complete: Vec<&ToolCall> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCallComplete(call) => Some(call),
                _ => None,
            })
            .collect();
        assert_eq!(complete, vec![&ToolCall::new("call_1", "shell", "{\"command\":\"ls\"}")]);
        assert!(events.contains(&StreamEvent::Finish(FinishReason::ToolCalls)));
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(events.iter().filter(|e| **e == StreamEvent::Done).count(), 1);
    }

    #[test]
    fn test_text_usage_and_stop() {
        let events = decode_all(&[
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data:{"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
            r#"data: {"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":2,"total_tokens":11}}"#,
            "data: [DONE]",
        ]);
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hel".into()),
                StreamEvent::TextDelta("lo".into()),
                StreamEvent::Finish(FinishReason::Stop),
                StreamEvent::Usage(TokenUsage::new(9, 2)),
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn test_error_payload_and_bad_lines() {
        let mut decoder = OpenAiDecoder::default();
        let events = decoder
            .decode_line(r#"data: {"error":{"message":"rate   limited","type":"requests"}}"#)
            .unwrap();
        assert_eq!(events, vec![StreamEvent::Error("rate limited".into())]);

        assert!(matches!(decoder.decode_line("data: {not json"), Err(AgentError::Parse(_))));
        assert!(matches!(
            decoder.decode_line(r#"data: {"choices":"none"}"#),
            Err(AgentError::Parse(_))
        ));
        assert!(decoder.decode_line(": keep-alive").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunking_does_not_change_events() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"h\u{e9}llo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c\",\"function\":{\"name\":\"datetime\",\"arguments\":\"{}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        )
        .as_bytes();

        let mut runs = Vec::new();
        for size in [1, 7, 4096, body.len()] {
            let chunks: Vec<std::result::Result<Vec<u8>, String>> =
                body.chunks(size).map(|c| Ok(c.to_vec())).collect();
            let events: Vec<StreamEvent> =
                decode_event_stream(futures::stream::iter(chunks), OpenAiAdapter.event_decoder())
                    .map(|e| e.unwrap())
                    .collect()
                    .await;
            runs.push(events);
        }

        assert!(runs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(runs[0][0], StreamEvent::TextDelta("h\u{e9}llo".into()));
        assert_eq!(runs[0].last(), Some(&StreamEvent::Done));
    }

    #[test]
    fn test_stream_without_done_still_flushes() {
        let events = decode_all(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"datetime","arguments":"{}"}}]}}]}"#,
        ]);
        assert!(matches!(events[1], StreamEvent::ToolCallComplete(ref c) if c.id == "c"));
        assert_eq!(events[2], StreamEvent::Done);
    }

    #[test]
    fn test_decode_completion() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "shell", "arguments": "{\"command\":\"pwd\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        });

        let completion = OpenAiAdapter.decode_completion(&body).unwrap();
        assert_eq!(completion.content, "");
        assert_eq!(completion.tool_calls[0].id, "call_9");
        assert_eq!(completion.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(completion.usage, Some(TokenUsage::new(5, 7)));
    }

    #[test]
    fn test_decode_completion_errors() {
        let err = OpenAiAdapter
            .decode_completion(&json!({"error": {"message": "bad key"}}))
            .unwrap_err();
        assert!(matches!(err, AgentError::Provider(ref m) if m == "bad key"));

        let err = OpenAiAdapter.decode_completion(&json!({"object": "list"})).unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
    }
}
