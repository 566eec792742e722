//! Environment-driven settings for the terminal front end.

use std::path::PathBuf;

use agent_core::exec::ExecutorConfig;
use agent_core::reasoning::AgentConfig;
use anyhow::{Context, Result};

/// Everything the binary reads from the environment
#[derive(Clone, Debug, Default)]
pub struct CliConfig {
    pub agent: AgentConfig,
    pub executor: ExecutorConfig,
}

impl CliConfig {
    /// Load from `AGENT_*` variables, keeping defaults for anything unset
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let agent = &mut config.agent;

        if let Some(prompt) = lookup("AGENT_SYSTEM_PROMPT").filter(|p| !p.trim().is_empty()) {
            agent.system_prompt = Some(prompt);
        }
        if let Some(path) = lookup("AGENT_SYSTEM_PROMPT_FILE") {
            let prompt = std::fs::read_to_string(&path)
                .with_context(|| format!("reading system prompt from {}", path))?;
            agent.system_prompt = Some(prompt);
        }
        if let Some(model) = lookup("AGENT_MODEL") {
            agent.generation.model = model;
        }
        if let Some(value) = lookup("AGENT_MAX_ROUNDS") {
            agent.max_rounds = value.parse().context("AGENT_MAX_ROUNDS must be an integer")?;
        }
        if let Some(value) = lookup("AGENT_MAX_TOKENS") {
            agent.generation.max_tokens = value
                .parse()
                .context("AGENT_MAX_TOKENS must be an integer")?;
        }
        if let Some(value) = lookup("AGENT_TEMPERATURE") {
            agent.generation.temperature = value
                .parse()
                .context("AGENT_TEMPERATURE must be a number")?;
        }
        if let Some(value) = lookup("AGENT_STREAM") {
            agent.stream = parse_flag(&value).context("AGENT_STREAM must be true or false")?;
        }

        let executor = &mut config.executor;
        if let Some(value) = lookup("AGENT_TOOL_TIMEOUT_MS") {
            executor.default_timeout_ms = value
                .parse()
                .context("AGENT_TOOL_TIMEOUT_MS must be an integer")?;
        }
        if let Some(dir) = lookup("AGENT_WORKDIR") {
            executor.workdir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<CliConfig> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        CliConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.agent.max_rounds, 10);
        assert!(config.agent.stream);
        assert!(config.agent.system_prompt.is_none());
        assert_eq!(config.executor.default_timeout_ms, 120_000);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("AGENT_MAX_ROUNDS", "3"),
            ("AGENT_MODEL", "claude-3-5-haiku-latest"),
            ("AGENT_STREAM", "off"),
            ("AGENT_SYSTEM_PROMPT", "Be terse."),
        ])
        .unwrap();
        assert_eq!(config.agent.max_rounds, 3);
        assert_eq!(config.agent.generation.model, "claude-3-5-haiku-latest");
        assert!(!config.agent.stream);
        assert_eq!(config.agent.system_prompt.as_deref(), Some("Be terse."));
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("AGENT_MAX_ROUNDS", "many")]).is_err());
        assert!(load(&[("AGENT_STREAM", "maybe")]).is_err());
    }
}
