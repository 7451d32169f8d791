//! Application settings
//!
//! Loaded from `concierge.toml` with environment and CLI overrides. All
//! sections are optional; defaults match the documented profile.

use config::{Config, File};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::orchestrator::{PoolConfig, ReactLoopConfig};

/// Top-level settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerSettings,
    /// ReAct loop tunables
    #[serde(default)]
    pub react: ReactLoopConfig,
    /// Agent pool settings
    #[serde(default)]
    pub pool: PoolConfig,
    /// LLM provider settings
    #[serde(default)]
    pub llm: LlmSettings,
    /// Per-tenant rate limiting; disabled when absent
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Persona prefix for the system prompt
    #[serde(default)]
    pub persona: Option<String>,
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8088
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// LLM provider settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmSettings {
    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL override for OpenAI-compatible endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
        }
    }
}

/// Per-tenant rate limit settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Whether the limiter is active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sustained requests per second per tenant
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
    /// Burst allowance
    #[serde(default = "default_burst")]
    pub burst_size: u32,
}

fn default_true() -> bool {
    true
}
fn default_rps() -> u32 {
    2
}
fn default_burst() -> u32 {
    5
}

impl Settings {
    /// Load settings, applying CLI overrides
    pub fn new_with_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if cli.config.exists() {
            builder = builder.add_source(File::from(cli.config.clone()));
        }
        let mut settings: Settings = builder
            .add_source(config::Environment::with_prefix("CONCIERGE").separator("__"))
            .build()?
            .try_deserialize()
            .unwrap_or_else(|_| Settings::default());

        if let Some(host) = &cli.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            settings.server.port = port;
        }
        if let Some(model) = &cli.model {
            settings.llm.model = model.clone();
        }
        if let Some(base_url) = &cli.llm_base_url {
            settings.llm.base_url = Some(base_url.clone());
        }
        if let Some(pool_dir) = &cli.pool_dir {
            settings.pool.persist_dir = Some(pool_dir.clone());
        }

        Ok(settings)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            react: ReactLoopConfig::default(),
            pool: PoolConfig::default(),
            llm: LlmSettings::default(),
            rate_limit: None,
            persona: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8088);
        assert_eq!(settings.react.max_turns, 10);
        assert!(settings.rate_limit.is_none());
    }
}
