//! Structured approval flows
//!
//! Agents that declare `needs_approval` park in the pool until the user
//! answers. Requests built from a parked agent's state are surfaced in
//! `ReactLoopResult::pending_approvals`; when one assistant turn parks
//! several agents, all requests are batched and surfaced together.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::agent::Agent;

/// Options offered with every approval request
pub const APPROVAL_OPTIONS: [&str; 3] = ["approve", "edit", "cancel"];

/// A pending approval surfaced to the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Agent instance awaiting approval
    pub agent_id: String,
    /// Agent type name
    pub agent_name: String,
    /// User-facing summary of the action
    pub action_summary: String,
    /// Collected parameters the action would run with
    pub details: Map<String, Value>,
    /// Responses the user can give
    pub options: Vec<String>,
    /// Minutes before the request auto-cancels
    pub timeout_minutes: u64,
    /// Whether the user may edit parameters instead of approving as-is
    pub allow_modification: bool,
}

/// Build an approval request from a parked agent
pub fn build_approval_request(agent: &dyn Agent, timeout_minutes: u64) -> ApprovalRequest {
    ApprovalRequest {
        agent_id: agent.agent_id().to_string(),
        agent_name: agent.agent_type().to_string(),
        action_summary: agent.approval_prompt(),
        details: agent.collected_fields(),
        options: APPROVAL_OPTIONS.iter().map(|s| s.to_string()).collect(),
        timeout_minutes,
        allow_modification: true,
    }
}

/// The user's decision on a pending approval
#[derive(Debug, Clone)]
pub enum ApprovalDecision {
    /// Run the action as presented
    Approved,
    /// Re-seed the given fields, then ask again
    Edited(Map<String, Value>),
    /// Abandon the action
    Cancelled,
}

/// Parse a user reply into an approval decision
///
/// Accepts the loose forms users actually type. Returns `None` when the
/// reply is not recognizably a decision, so the caller can re-prompt.
pub fn parse_approval_response(text: &str) -> Option<ApprovalDecision> {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();

    match lower.as_str() {
        "approve" | "approved" | "yes" | "y" | "ok" | "confirm" => {
            return Some(ApprovalDecision::Approved)
        }
        "cancel" | "cancelled" | "no" | "n" | "reject" | "stop" => {
            return Some(ApprovalDecision::Cancelled)
        }
        _ => {}
    }

    if lower == "edit" || lower.starts_with("edit ") || lower.starts_with("edit:") {
        let rest = trimmed[4..].trim_start_matches(':').trim();
        let fields = parse_edit_fields(rest);
        if !fields.is_empty() {
            return Some(ApprovalDecision::Edited(fields));
        }
    }

    None
}

/// Parse `field=value, other=value` pairs from an edit reply
fn parse_edit_fields(rest: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    for pair in rest.split(',') {
        let Some((key, raw)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let raw = raw.trim().trim_matches('"');
        if key.is_empty() || raw.is_empty() {
            continue;
        }
        // Numbers and booleans parse as JSON; everything else is a string
        let value = serde_json::from_str::<Value>(raw)
            .ok()
            .filter(|v| v.is_number() || v.is_boolean())
            .unwrap_or_else(|| Value::String(raw.to_string()));
        fields.insert(key.to_string(), value);
    }
    fields
}

/// Batch approval requests parked by a single assistant turn
///
/// Pass-through today; kept as the seam where future versions may merge
/// or reorder requests for presentation.
pub fn collect_batch_approvals(requests: Vec<ApprovalRequest>) -> Vec<ApprovalRequest> {
    if requests.len() > 1 {
        tracing::debug!(count = requests.len(), "batching approval requests");
    }
    requests
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_approve_forms() {
        for text in ["approve", "Approve", " yes ", "OK", "confirm"] {
            assert!(matches!(
                parse_approval_response(text),
                Some(ApprovalDecision::Approved)
            ));
        }
    }

    #[test]
    fn parses_cancel_forms() {
        for text in ["cancel", "no", "reject", "STOP"] {
            assert!(matches!(
                parse_approval_response(text),
                Some(ApprovalDecision::Cancelled)
            ));
        }
    }

    #[test]
    fn parses_edit_with_fields() {
        let Some(ApprovalDecision::Edited(fields)) =
            parse_approval_response("edit amount=100, memo=\"team lunch\"")
        else {
            panic!("expected edit decision");
        };
        assert_eq!(fields["amount"], Value::from(100));
        assert_eq!(fields["memo"], Value::from("team lunch"));
    }

    #[test]
    fn unrecognized_replies_reprompt() {
        assert!(parse_approval_response("what does this do?").is_none());
        assert!(parse_approval_response("edit").is_none());
    }
}
