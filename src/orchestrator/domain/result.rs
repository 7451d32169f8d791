//! Agent status and reply types

use serde::{Deserialize, Serialize};

/// Lifecycle status of a stateful agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Agent is executing its action
    Running,
    /// Agent needs more input from the user
    WaitingForInput,
    /// Agent needs user confirmation before acting
    WaitingForApproval,
    /// Agent is paused
    Paused,
    /// Agent finished successfully
    Completed,
    /// Agent failed
    Error,
    /// Agent was cancelled by the user
    Cancelled,
}

impl AgentStatus {
    /// States that indicate agent execution is finished
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Error | AgentStatus::Cancelled
        )
    }

    /// States in which the agent is parked awaiting the user
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            AgentStatus::WaitingForInput | AgentStatus::WaitingForApproval
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Running => "running",
            AgentStatus::WaitingForInput => "waiting_for_input",
            AgentStatus::WaitingForApproval => "waiting_for_approval",
            AgentStatus::Paused => "paused",
            AgentStatus::Completed => "completed",
            AgentStatus::Error => "error",
            AgentStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Result of driving a stateful agent one step
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Agent type name
    pub agent_type: String,
    /// Status after the step
    pub status: AgentStatus,
    /// User-facing message (final answer, next prompt, or approval prompt)
    pub raw_message: String,
    /// Error detail when status is Error
    pub error_message: Option<String>,
}

impl AgentReply {
    /// Reply in a given status with a user-facing message
    pub fn new(
        agent_type: impl Into<String>,
        status: AgentStatus,
        raw_message: impl Into<String>,
    ) -> Self {
        Self {
            agent_type: agent_type.into(),
            status,
            raw_message: raw_message.into(),
            error_message: None,
        }
    }

    /// Error reply
    pub fn error(agent_type: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            agent_type: agent_type.into(),
            status: AgentStatus::Error,
            raw_message: message.clone(),
            error_message: Some(message),
        }
    }
}
