//! # agent-core
//!
//! Streaming completion engine and tool-orchestration loop, independent of
//! any particular LLM vendor or transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Dialog ──▶ SessionManager ──▶ Agent (bounded round loop)    │
//! │                                  │              │            │
//! │                                  ▼              ▼            │
//! │                           LlmProvider     ToolRegistry       │
//! │                                  │              │            │
//! │          SseDecoder ─▶ EventDecoder       CommandExecutor    │
//! │                        + ToolCallAccumulator                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Wire formats live behind [`provider::ProviderAdapter`]; the runtime crate
//! supplies OpenAI and Anthropic adapters and the HTTP transport.

pub mod accumulator;
pub mod builtin;
pub mod dialog;
pub mod error;
pub mod exec;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod session;
pub mod sse;
pub mod tool;

pub use accumulator::ToolCallAccumulator;
pub use dialog::{Dialog, DialogSource, InboundMessage};
pub use error::{AgentError, Result};
pub use exec::{CommandExecutor, ExecutorConfig};
pub use message::{Conversation, Message, Role};
pub use provider::{
    Completion, EventDecoder, EventStream, FinishReason, LlmProvider, ProviderAdapter,
    ProviderKind, Request, StreamEvent,
};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, TurnOutcome};
pub use session::{Session, SessionManager};
pub use sse::SseDecoder;
pub use tool::{Tool, ToolCall, ToolDefinition, ToolRegistry, ToolResult};
