//! Agent Loop
//!
//! Drives one user turn through bounded model rounds:
//!
//! ```text
//! AwaitingModel ──► Responding ──► (final answer)
//!       │
//!       └──► ToolsPending ──► AwaitingModel (round + 1)
//!                                  │
//!                                  └──► Terminated (round limit)
//! ```
//!
//! A round's messages are appended to the conversation only once its stream
//! has completed, so a failed round leaves the history untouched.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message};
use crate::provider::{
    FinishReason, GenerationOptions, LlmProvider, Request, StreamEvent, TokenUsage,
};
use crate::tool::{Tool, ToolCall, ToolRegistry};

/// Response returned when a turn runs out of rounds
pub const ROUND_LIMIT_RESPONSE: &str =
    "[stopped: reached the maximum number of tool rounds without a final answer]";

/// Agent configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System prompt sent with every request
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Maximum model rounds per user turn
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Generation options
    #[serde(default)]
    pub generation: GenerationOptions,

    /// Stream responses instead of waiting for the whole completion
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_max_rounds() -> usize { 10 }
fn default_stream() -> bool { true }

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_rounds: default_max_rounds(),
            generation: GenerationOptions::default(),
            stream: default_stream(),
        }
    }
}

/// Where a turn is in the round state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    Responding,
    ToolsPending,
    Terminated,
}

/// Result of one user turn
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
    /// Final answer, or [`ROUND_LIMIT_RESPONSE`]
    pub text: String,

    /// Completed model rounds
    pub rounds: usize,

    /// Finish reason of the last round
    pub finish_reason: Option<FinishReason>,

    /// Token usage summed over the turn
    pub usage: TokenUsage,

    /// Whether the round limit ended the turn
    pub terminated: bool,
}

/// Everything one model round produced
#[derive(Debug, Default)]
struct RoundOutput {
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<TokenUsage>,
}

/// The main Agent struct
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self::new(provider, tools, AgentConfig::default())
    }

    /// Append `text` as a user message and run the turn
    pub async fn send(&self, conversation: &mut Conversation, text: &str) -> Result<TurnOutcome> {
        conversation.push(Message::user(text))?;
        self.run(conversation).await
    }

    /// [`Agent::send`] with an event observer and a cancellation token
    pub async fn send_observed<F>(
        &self,
        conversation: &mut Conversation,
        text: &str,
        cancel: &CancellationToken,
        observer: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&StreamEvent) + Send,
    {
        conversation.push(Message::user(text))?;
        self.run_observed(conversation, cancel, observer).await
    }

    /// Run the agent on a conversation that ends with a user message
    pub async fn run(&self, conversation: &mut Conversation) -> Result<TurnOutcome> {
        self.run_observed(conversation, &CancellationToken::new(), |_| {})
            .await
    }

    /// Run the turn, reporting every stream event to `observer`.
    ///
    /// `cancel` is checked between stream events; cancelling aborts the
    /// current round without appending anything for it.
    pub async fn run_observed<F>(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
        mut observer: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&StreamEvent) + Send,
    {
        let mut state = LoopState::AwaitingModel;
        let mut rounds = 0;
        let mut usage = TokenUsage::default();
        let mut finish_reason = None;

        loop {
            debug_assert_eq!(state, LoopState::AwaitingModel);

            if rounds >= self.config.max_rounds {
                state = LoopState::Terminated;
                tracing::warn!(rounds, ?state, "round limit reached, ending turn");
                return Ok(TurnOutcome {
                    text: ROUND_LIMIT_RESPONSE.to_string(),
                    rounds,
                    finish_reason,
                    usage,
                    terminated: true,
                });
            }

            let request = self.build_request(conversation);
            let output = if self.config.stream {
                self.stream_round(&request, cancel, &mut observer).await?
            } else {
                self.complete_round(&request).await?
            };
            rounds += 1;

            if let Some(round_usage) = output.usage {
                usage.prompt_tokens += round_usage.prompt_tokens;
                usage.completion_tokens += round_usage.completion_tokens;
                usage.total_tokens += round_usage.total_tokens;
            }
            finish_reason = output.finish_reason.clone();

            if output.tool_calls.is_empty() {
                state = LoopState::Responding;
                tracing::debug!(
                    rounds,
                    ?state,
                    finish_reason = ?output.finish_reason,
                    "final answer"
                );
                // Providers reject empty assistant turns in later requests.
                if output.text.trim().is_empty() {
                    tracing::debug!(rounds, "model returned an empty answer, not recorded");
                } else {
                    conversation.push(Message::assistant(output.text.clone()))?;
                }
                return Ok(TurnOutcome {
                    text: output.text,
                    rounds,
                    finish_reason,
                    usage,
                    terminated: false,
                });
            }

            state = LoopState::ToolsPending;
            tracing::debug!(
                rounds,
                ?state,
                calls = output.tool_calls.len(),
                "executing tool calls"
            );
            self.execute_tools(conversation, output).await?;
            state = LoopState::AwaitingModel;
        }
    }

    /// Build the request for the next round
    fn build_request(&self, conversation: &Conversation) -> Request {
        Request::new(&self.config.generation, conversation.messages().to_vec())
            .with_system(self.config.system_prompt.clone())
            .with_tools(self.tools.definitions())
            .streaming(self.config.stream)
    }

    async fn stream_round<F>(
        &self,
        request: &Request,
        cancel: &CancellationToken,
        observer: &mut F,
    ) -> Result<RoundOutput>
    where
        F: FnMut(&StreamEvent) + Send,
    {
        let mut events = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
            stream = self.provider.complete_stream(request) => stream?,
        };
        let mut output = RoundOutput::default();

        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AgentError::Cancelled),
                event = events.next() => event,
            };
            let Some(event) = event else { break };
            let event = event?;
            observer(&event);

            match event {
                StreamEvent::TextDelta(text) => output.text.push_str(&text),
                StreamEvent::ToolCallDelta { .. } => {}
                StreamEvent::ToolCallComplete(call) => output.tool_calls.push(call),
                StreamEvent::Finish(reason) => output.finish_reason = Some(reason),
                StreamEvent::Usage(round_usage) => {
                    output.usage.get_or_insert_with(TokenUsage::default).merge(round_usage);
                }
                StreamEvent::Error(message) => {
                    tracing::warn!(
                        provider = self.provider.name(),
                        %message,
                        "provider reported a stream error"
                    );
                    return Err(AgentError::Provider(message));
                }
                StreamEvent::Done => break,
            }
        }

        Ok(output)
    }

    async fn complete_round(&self, request: &Request) -> Result<RoundOutput> {
        let completion = self.provider.complete(request).await?;
        Ok(RoundOutput {
            text: completion.content,
            tool_calls: completion.tool_calls,
            finish_reason: completion.finish_reason,
            usage: completion.usage,
        })
    }

    /// Record the assistant's calls, then run them in order, appending one
    /// tool message per call.
    async fn execute_tools(
        &self,
        conversation: &mut Conversation,
        output: RoundOutput,
    ) -> Result<()> {
        let calls = output.tool_calls;
        conversation.push(Message::assistant_with_tools(output.text, calls.clone()))?;

        for call in &calls {
            let result = self.tools.execute(call).await;
            if !result.success {
                tracing::debug!(
                    tool = %call.name,
                    id = %call.id,
                    error = ?result.error,
                    "tool reported failure"
                );
            }
            conversation.push(Message::tool(result.to_message_content(), &call.id, &call.name))?;
        }
        Ok(())
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            config: AgentConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    pub fn max_rounds(mut self, max: usize) -> Self {
        self.config.max_rounds = max;
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.config.stream = stream;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        Ok(Agent::new(provider, Arc::new(self.tools), self.config))
    }
}
