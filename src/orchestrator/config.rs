//! Orchestrator configuration types

use serde::{Deserialize, Serialize};

/// All ReAct loop tunables in one place
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReactLoopConfig {
    /// Maximum planner turns before the forced summary call
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Regular tool timeout in seconds
    #[serde(default = "default_tool_timeout")]
    pub tool_execution_timeout: u64,
    /// Agent-Tool timeout in seconds
    #[serde(default = "default_agent_tool_timeout")]
    pub agent_tool_execution_timeout: u64,
    /// A single tool result may consume at most this fraction of the context window
    #[serde(default = "default_tool_result_share")]
    pub max_tool_result_share: f64,
    /// Single tool result hard character limit
    #[serde(default = "default_tool_result_chars")]
    pub max_tool_result_chars: usize,

    /// Context window size in tokens
    #[serde(default = "default_context_tokens")]
    pub context_token_limit: usize,
    /// Trigger history trimming when usage exceeds this fraction
    #[serde(default = "default_trim_threshold")]
    pub context_trim_threshold: f64,
    /// Max non-system messages retained after trimming
    #[serde(default = "default_max_history")]
    pub max_history_messages: usize,

    /// Max LLM call retries on retryable errors
    #[serde(default = "default_llm_retries")]
    pub llm_max_retries: u32,
    /// Retry base delay in seconds (exponential back-off)
    #[serde(default = "default_retry_delay")]
    pub llm_retry_base_delay: f64,

    /// Approval auto-cancel timeout in minutes
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_minutes: u64,
}

fn default_max_turns() -> u32 {
    10
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_agent_tool_timeout() -> u64 {
    120
}
fn default_tool_result_share() -> f64 {
    0.3
}
fn default_tool_result_chars() -> usize {
    400_000
}
fn default_context_tokens() -> usize {
    128_000
}
fn default_trim_threshold() -> f64 {
    0.8
}
fn default_max_history() -> usize {
    40
}
fn default_llm_retries() -> u32 {
    2
}
fn default_retry_delay() -> f64 {
    1.0
}
fn default_approval_timeout() -> u64 {
    30
}

impl Default for ReactLoopConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            tool_execution_timeout: default_tool_timeout(),
            agent_tool_execution_timeout: default_agent_tool_timeout(),
            max_tool_result_share: default_tool_result_share(),
            max_tool_result_chars: default_tool_result_chars(),
            context_token_limit: default_context_tokens(),
            context_trim_threshold: default_trim_threshold(),
            max_history_messages: default_max_history(),
            llm_max_retries: default_llm_retries(),
            llm_retry_base_delay: default_retry_delay(),
            approval_timeout_minutes: default_approval_timeout(),
        }
    }
}

/// Agent pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Maximum concurrent pooled agents per tenant; overflow evicts oldest
    #[serde(default = "default_max_agents")]
    pub max_agents_per_tenant: usize,
    /// TTL for pooled agents in seconds
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Background sweep interval in seconds (kept at or below TTL / 4)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Directory for write-through pool persistence; in-memory only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_dir: Option<std::path::PathBuf>,
}

fn default_max_agents() -> usize {
    10
}
fn default_ttl() -> u64 {
    86_400
}
fn default_sweep_interval() -> u64 {
    default_ttl() / 4
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_agents_per_tenant: default_max_agents(),
            ttl_seconds: default_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            persist_dir: None,
        }
    }
}

impl PoolConfig {
    /// Effective sweep period, clamped to TTL / 4
    pub fn sweep_period(&self) -> std::time::Duration {
        let cap = (self.ttl_seconds / 4).max(1);
        std::time::Duration::from_secs(self.sweep_interval_seconds.clamp(1, cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_profile() {
        let cfg = ReactLoopConfig::default();
        assert_eq!(cfg.max_turns, 10);
        assert_eq!(cfg.tool_execution_timeout, 30);
        assert_eq!(cfg.agent_tool_execution_timeout, 120);
        assert_eq!(cfg.max_tool_result_chars, 400_000);
        assert_eq!(cfg.context_token_limit, 128_000);
        assert_eq!(cfg.max_history_messages, 40);
        assert_eq!(cfg.llm_max_retries, 2);
        assert_eq!(cfg.approval_timeout_minutes, 30);
    }

    #[test]
    fn sweep_period_clamped_to_quarter_ttl() {
        let cfg = PoolConfig {
            ttl_seconds: 100,
            sweep_interval_seconds: 90,
            ..Default::default()
        };
        assert_eq!(cfg.sweep_period(), std::time::Duration::from_secs(25));
    }
}
