//! Configuration file support

use anyhow::Context;
use chorus_agent::SupervisorConfig;
use chorus_ai::{Provider, ProviderConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for chorus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default provider
    pub provider: Option<String>,
    /// Default model to use
    pub model: Option<String>,
    /// System prompt sent with every request
    pub system_prompt: Option<String>,
    /// Thinking budget in tokens; thinking is off when absent or zero
    pub thinking_budget: Option<u32>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Maximum provider calls per request
    pub max_tool_depth: Option<usize>,
    /// Seconds to wait for a tool result
    pub tool_timeout_secs: Option<u64>,
    /// API keys (alternative to environment variables)
    pub api_keys: PerProvider,
    /// Base URL overrides
    pub base_urls: PerProvider,
}

/// One optional string per provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerProvider {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub google: Option<String>,
    pub poe: Option<String>,
    pub cohere: Option<String>,
    pub compatible: Option<String>,
}

impl PerProvider {
    pub fn get(&self, provider: Provider) -> Option<&str> {
        let value = match provider {
            Provider::OpenAI => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Google => &self.google,
            Provider::Poe => &self.poe,
            Provider::Cohere => &self.cohere,
            Provider::OpenAICompatible => &self.compatible,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chorus")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CHORUS_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config file: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Save config to file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> anyhow::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            provider: Some("anthropic".to_string()),
            model: Some(default_model(Provider::Anthropic).to_string()),
            max_tool_depth: Some(5),
            tool_timeout_secs: Some(300),
            ..Config::default()
        };
        default_config.save_to(&path)?;
        Ok(path)
    }

    /// API key from the config file, then the provider's environment variables
    pub fn api_key(&self, provider: Provider) -> Option<String> {
        if let Some(key) = self.api_keys.get(provider) {
            return Some(key.to_string());
        }
        ProviderConfig::from_env(provider).ok().map(|c| c.api_key)
    }

    /// Connection settings for a provider, or `None` without an API key
    pub fn provider_config(&self, provider: Provider) -> Option<ProviderConfig> {
        let config = ProviderConfig::new(provider, self.api_key(provider)?);
        Some(match self.base_urls.get(provider) {
            Some(url) => config.with_base_url(url),
            None => config,
        })
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let defaults = SupervisorConfig::default();
        SupervisorConfig {
            // At least one provider call
            max_tool_depth: self.max_tool_depth.unwrap_or(defaults.max_tool_depth).max(1),
            tool_result_timeout: self
                .tool_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.tool_result_timeout),
            ..defaults
        }
    }
}

/// Model used when neither the command line nor the config names one
pub fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAI => "gpt-4.1",
        Provider::Anthropic => "claude-sonnet-4-5-20250929",
        Provider::Google => "gemini-2.5-flash",
        Provider::Poe => "Claude-Sonnet-4.5",
        Provider::Cohere => "command-a-03-2025",
        Provider::OpenAICompatible => "openai/gpt-4o-mini",
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# chorus configuration file
# Place at ~/.config/chorus/config.toml (Linux) or set CHORUS_CONFIG_PATH

# Default provider (openai, anthropic, google, poe, cohere, compatible)
provider = "anthropic"

# Default model to use
model = "claude-sonnet-4-5-20250929"

# system_prompt = "You are a helpful assistant."

# Thinking budget in tokens (omit or 0 to disable)
# thinking_budget = 4096

# temperature = 0.7
# max_tokens = 8192

# Maximum provider calls per request, including tool rounds
max_tool_depth = 5

# Seconds to wait for a tool result
tool_timeout_secs = 300

# API keys (optional - environment variables are used otherwise)
[api_keys]
# openai = "sk-..."
# anthropic = "sk-ant-..."
# google = "..."
# poe = "..."
# cohere = "..."
# compatible = "sk-or-..."

# Base URL overrides
[base_urls]
# compatible = "https://api.groq.com/openai/v1"
"#
}
