//! Trigger engine contract
//!
//! Scheduled and event-driven tasks enter the orchestrator as virtual user
//! messages; the core does not distinguish them from user-originated
//! messages beyond metadata. Outbound, the engine can enumerate pending
//! approvals and is told when one expires without user action.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::approval::ApprovalRequest;

/// Metadata source value for trigger-originated messages
pub const TRIGGER_SOURCE: &str = "trigger";

/// An inbound trigger firing
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    /// Tenant the task belongs to
    pub tenant_id: String,
    /// Message content handed to the orchestrator
    pub content: String,
    /// Identifier of the triggered task
    pub task_id: String,
}

impl TriggerEvent {
    /// Metadata attached to the synthesized user message
    pub fn metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("source".to_string(), json!(TRIGGER_SOURCE));
        metadata.insert("task_id".to_string(), json!(self.task_id));
        metadata
    }
}

/// A pending approval with its originating task, if any
#[derive(Debug, Clone)]
pub struct PendingApproval {
    /// The approval request
    pub request: ApprovalRequest,
    /// Where the request came from ("user" or "trigger")
    pub source: String,
    /// Triggered-task identifier, when trigger-originated
    pub task_id: Option<String>,
}

/// Outbound contract to the trigger engine
#[async_trait]
pub trait TriggerEngine: Send + Sync {
    /// Mark a triggered task expired after its approval lapsed
    async fn mark_expired(&self, task_id: &str);
}

/// Engine that ignores all notifications
#[derive(Default)]
pub struct NullTriggerEngine;

#[async_trait]
impl TriggerEngine for NullTriggerEngine {
    async fn mark_expired(&self, task_id: &str) {
        tracing::debug!(task_id, "approval expired; no trigger engine configured");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_metadata_shape() {
        let event = TriggerEvent {
            tenant_id: "t1".into(),
            content: "Send the morning briefing".into(),
            task_id: "task_42".into(),
        };
        let metadata = event.metadata();
        assert_eq!(metadata["source"], "trigger");
        assert_eq!(metadata["task_id"], "task_42");
    }
}
