//! HTTP transport shared by every adapter.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    provider::{Completion, EventStream, LlmProvider, ProviderAdapter, Request},
    sse::decode_event_stream,
};
use async_trait::async_trait;
use serde_json::Value;

use crate::ProviderConfig;

/// `LlmProvider` speaking an adapter's wire format over reqwest
pub struct HttpProvider<A> {
    client: reqwest::Client,
    adapter: A,
    config: ProviderConfig,
    url: String,
}

impl<A: ProviderAdapter> HttpProvider<A> {
    pub fn new(adapter: A, config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {}", e)))?;
        let url = format!("{}{}", config.base_url.trim_end_matches('/'), adapter.endpoint());

        Ok(Self {
            client,
            adapter,
            config,
            url,
        })
    }

    /// Full request URL
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    async fn send(&self, request: &Request) -> Result<reqwest::Response> {
        let body = self.adapter.encode_request(request);
        let mut builder = self.client.post(&self.url).json(&body);
        for (name, value) in self.adapter.headers(&self.config.api_key) {
            builder = builder.header(name, value);
        }
        if !request.stream {
            builder = builder.timeout(Duration::from_secs(self.config.request_timeout_secs));
        }

        tracing::debug!(
            provider = %self.adapter.kind(),
            url = %self.url,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream = request.stream,
            "sending request"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        let detail = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|value| error_summary(&value))
            .unwrap_or_else(|| collapse(&text));
        tracing::warn!(provider = %self.adapter.kind(), %status, %detail, "request rejected");
        Err(AgentError::Provider(format!("{}: {}", status, detail)))
    }
}

#[async_trait]
impl<A: ProviderAdapter> LlmProvider for HttpProvider<A> {
    fn name(&self) -> &str {
        self.adapter.kind().as_str()
    }

    async fn complete(&self, request: &Request) -> Result<Completion> {
        let request = request.clone().streaming(false);
        let response = self.send(&request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;
        let body: Value = serde_json::from_slice(&bytes).map_err(|e| {
            tracing::warn!(
                provider = %self.adapter.kind(),
                error = %e,
                "completion body is not JSON"
            );
            AgentError::Provider(format!(
                "malformed completion body: {}: {}",
                e,
                collapse(&String::from_utf8_lossy(&bytes))
            ))
        })?;
        self.adapter.decode_completion(&body)
    }

    async fn complete_stream(&self, request: &Request) -> Result<EventStream> {
        let request = request.clone().streaming(true);
        let response = self.send(&request).await?;
        Ok(decode_event_stream(response.bytes_stream(), self.adapter.event_decoder()))
    }
}

/// The human-readable message of a provider error body, whitespace collapsed.
///
/// Looks at `error.message`, a bare `error` string, then a top-level
/// `message`.
pub fn error_summary(value: &Value) -> Option<String> {
    value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| value.get("error").and_then(Value::as_str))
        .or_else(|| value.get("message").and_then(Value::as_str))
        .map(collapse)
        .filter(|s| !s.is_empty())
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_summary_variants() {
        assert_eq!(
            error_summary(&json!({"error": {"message": "bad\n  key"}})).as_deref(),
            Some("bad key")
        );
        assert_eq!(error_summary(&json!({"error": "nope"})).as_deref(), Some("nope"));
        assert_eq!(error_summary(&json!({"message": "down"})).as_deref(), Some("down"));
        assert_eq!(error_summary(&json!({"error": {"code": 1}})), None);
    }
}
