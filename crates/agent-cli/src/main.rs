//! agent-cli
//!
//! Terminal chat with the agent. Provider settings come from the
//! environment (or a `.env` file); logs go to stderr so stdout stays clean
//! for the conversation. Replies print as they stream; Ctrl-C cancels the
//! reply in progress and `/exit` quits.

mod cli;
mod config;

use std::sync::Arc;

use agent_core::builtin::default_registry;
use agent_core::dialog::serve_interruptible;
use agent_core::{CommandExecutor, LlmProvider, SessionManager};
use agent_runtime::{build_provider, AgentBuilder, ProviderConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::CliDialog;
use crate::config::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn,agent_core=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = CliConfig::from_env()?;
    let provider_config = ProviderConfig::from_env()?;
    let provider = build_provider(provider_config)?;

    let tools = default_registry(CommandExecutor::new(settings.executor));
    tracing::info!(tools = ?tools.names(), "registered tools");

    let agent = AgentBuilder::new()
        .provider(Arc::clone(&provider))
        .tools(tools)
        .config(settings.agent)
        .build()?;
    tracing::info!(
        provider = provider.name(),
        model = %agent.config().generation.model,
        max_rounds = agent.config().max_rounds,
        "agent ready"
    );

    let mut sessions = SessionManager::new(agent);
    let mut dialog = CliDialog::stdio();
    serve_interruptible(&mut dialog, &mut sessions, || async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C, replies are not interruptible");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    Ok(())
}
