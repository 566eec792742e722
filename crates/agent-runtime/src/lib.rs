//! # agent-runtime
//!
//! Concrete providers for the agent engine.
//!
//! ## Providers
//!
//! - **OpenAI** (`openai` feature): Chat Completions API
//! - **Anthropic** (`anthropic` feature): Messages API
//!
//! Both run over the same reqwest transport, [`HttpProvider`], which pipes
//! the response body through the engine's SSE decoder as it arrives.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{build_provider, ProviderConfig};
//!
//! let provider = build_provider(ProviderConfig::from_env()?)?;
//! let agent = AgentBuilder::new()
//!     .provider(provider)
//!     .build()?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod http;

#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicAdapter;
pub use http::HttpProvider;
#[cfg(feature = "openai")]
pub use openai::OpenAiAdapter;

// Re-export core types for convenience
pub use agent_core::{
    Agent, AgentBuilder, AgentError, Conversation, LlmProvider, Message, ProviderKind, Result,
    Tool, ToolRegistry,
};

/// Provider connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// API key, sent in the provider's auth header
    #[serde(skip_serializing)]
    pub api_key: String,

    /// API root without the endpoint path
    pub base_url: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout for non-streaming calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 { 10 }
fn default_request_timeout() -> u64 { 120 }

impl ProviderConfig {
    pub fn new(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: api_key.into(),
            base_url: default_base_url(kind).into(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Read the provider settings from the environment.
    ///
    /// `AGENT_PROVIDER` picks the provider (default `openai`); the key comes
    /// from `OPENAI_API_KEY` or `ANTHROPIC_API_KEY` and the base URL may be
    /// overridden with `OPENAI_BASE_URL` or `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let kind: ProviderKind = std::env::var("AGENT_PROVIDER")
            .unwrap_or_else(|_| "openai".into())
            .parse()?;
        let (key_var, url_var) = match kind {
            ProviderKind::OpenAi => ("OPENAI_API_KEY", "OPENAI_BASE_URL"),
            ProviderKind::Anthropic => ("ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL"),
        };

        let api_key = std::env::var(key_var)
            .map_err(|_| AgentError::Config(format!("{} is not set", key_var)))?;
        let mut config = Self::new(kind, api_key);
        if let Ok(url) = std::env::var(url_var) {
            config.base_url = url;
        }
        if let Some(secs) = std::env::var("AGENT_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.request_timeout_secs = secs;
        }
        Ok(config)
    }
}

/// Default API root for a provider
pub fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "https://api.openai.com/v1",
        ProviderKind::Anthropic => "https://api.anthropic.com",
    }
}

/// Build the provider selected by `config.kind`
pub fn build_provider(config: ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    tracing::info!(provider = %config.kind, base_url = %config.base_url, "initializing provider");
    match config.kind {
        #[cfg(feature = "openai")]
        ProviderKind::OpenAi => Ok(Arc::new(HttpProvider::new(OpenAiAdapter::new(), config)?)),
        #[cfg(feature = "anthropic")]
        ProviderKind::Anthropic => {
            Ok(Arc::new(HttpProvider::new(AnthropicAdapter::new(), config)?))
        }
        #[allow(unreachable_patterns)]
        other => Err(AgentError::Config(format!(
            "provider '{}' is not compiled in",
            other
        ))),
    }
}
