//! Stateful agent runtime
//!
//! Agents collect their declared input fields across one or more user
//! messages, optionally wait for approval, then run their action. The
//! runtime is a tagged-state record with a transition table: each status
//! maps to a handler receiving the agent value and the incoming message.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::approval::ApprovalDecision;
use super::domain::{AgentReply, AgentStatus};
use super::invoker::ToolExecutionContext;
use super::registry::AgentSpec;

use std::sync::Arc;

/// The action an agent performs once its fields are collected and approved
#[async_trait]
pub trait AgentAction: Send + Sync {
    /// Run the action; the returned string becomes the agent's final message
    async fn run(
        &self,
        fields: &Map<String, Value>,
        ctx: &ToolExecutionContext,
    ) -> Result<String, String>;
}

/// Adapter exposing a plain closure as an [`AgentAction`]
pub struct SyncAction<F>(pub F);

#[async_trait]
impl<F> AgentAction for SyncAction<F>
where
    F: Fn(&Map<String, Value>) -> Result<String, String> + Send + Sync,
{
    async fn run(
        &self,
        fields: &Map<String, Value>,
        _ctx: &ToolExecutionContext,
    ) -> Result<String, String> {
        (self.0)(fields)
    }
}

/// A field value rejected during seeding
#[derive(Debug, Clone)]
pub struct FieldRejection {
    /// Field name
    pub field: String,
    /// Why the value was rejected
    pub reason: String,
}

/// Interface the pool and invoker use to drive a stateful agent
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique instance identifier
    fn agent_id(&self) -> &str;
    /// Agent type name (registry key)
    fn agent_type(&self) -> &str;
    /// Owning tenant
    fn tenant_id(&self) -> &str;
    /// Current lifecycle status
    fn status(&self) -> AgentStatus;
    /// Fields collected so far
    fn collected_fields(&self) -> Map<String, Value>;
    /// Field currently being asked of the user, if any
    fn pending_field(&self) -> Option<String>;

    /// Seed fields from planner-supplied arguments
    ///
    /// Unknown keys and `task_instruction` are ignored. Values that fail
    /// the declared type or validator are rejected, not silently accepted;
    /// the field stays missing and is collected from the user instead.
    fn seed_fields(&mut self, args: &Map<String, Value>) -> Vec<FieldRejection>;

    /// Drive the agent one step with an incoming user message
    async fn reply(&mut self, text: &str, ctx: &ToolExecutionContext) -> AgentReply;

    /// Resolve a pending approval
    async fn resolve_approval(
        &mut self,
        decision: ApprovalDecision,
        ctx: &ToolExecutionContext,
    ) -> AgentReply;

    /// User-facing summary of the action awaiting approval
    fn approval_prompt(&self) -> String;

    /// Restore persisted state into a freshly instantiated agent
    fn restore(&mut self, status: AgentStatus, collected: Map<String, Value>, pending: Option<String>);
}

/// Field-collecting agent driven by a declared [`AgentSpec`]
pub struct StateAgent {
    agent_id: String,
    tenant_id: String,
    spec: AgentSpec,
    action: Arc<dyn AgentAction>,
    status: AgentStatus,
    collected: Map<String, Value>,
    pending_field: Option<String>,
    approved: bool,
}

impl StateAgent {
    /// Fresh instance for a tenant
    pub fn new(spec: AgentSpec, action: Arc<dyn AgentAction>, tenant_id: &str) -> Self {
        let agent_id = format!(
            "{}_{}",
            spec.name,
            &uuid::Uuid::new_v4().to_string().replace('-', "")[..8]
        );
        Self {
            agent_id,
            tenant_id: tenant_id.to_string(),
            spec,
            action,
            status: AgentStatus::Running,
            collected: Map::new(),
            pending_field: None,
            approved: false,
        }
    }

    /// Continue from the current state: collect, seek approval, or act
    async fn advance(&mut self, ctx: &ToolExecutionContext) -> AgentReply {
        if let Some(field) = self
            .spec
            .input_fields
            .iter()
            .find(|f| f.required && !self.collected.contains_key(&f.name))
        {
            self.pending_field = Some(field.name.clone());
            self.status = AgentStatus::WaitingForInput;
            return AgentReply::new(&self.spec.name, self.status, &field.prompt);
        }

        self.pending_field = None;

        if self.spec.needs_approval && !self.approved {
            self.status = AgentStatus::WaitingForApproval;
            return AgentReply::new(&self.spec.name, self.status, self.approval_prompt());
        }

        self.run_action(ctx).await
    }

    async fn run_action(&mut self, ctx: &ToolExecutionContext) -> AgentReply {
        // Fill declared defaults for optional fields left unset
        for field in &self.spec.input_fields {
            if !field.required && !self.collected.contains_key(&field.name) {
                if let Some(default) = &field.default {
                    self.collected.insert(field.name.clone(), default.clone());
                }
            }
        }

        self.status = AgentStatus::Running;
        match self.action.run(&self.collected, ctx).await {
            Ok(text) => {
                self.status = AgentStatus::Completed;
                AgentReply::new(&self.spec.name, self.status, text)
            }
            Err(message) => {
                self.status = AgentStatus::Error;
                AgentReply::error(&self.spec.name, message)
            }
        }
    }

    /// Handler for `WaitingForInput`: the message answers the pending field
    async fn on_input(&mut self, text: &str, ctx: &ToolExecutionContext) -> AgentReply {
        let Some(name) = self.pending_field.clone() else {
            return self.advance(ctx).await;
        };
        let Some(field) = self.spec.field(&name).cloned() else {
            self.pending_field = None;
            return self.advance(ctx).await;
        };

        let value = match field.field_type.parse_text(text) {
            Ok(v) => v,
            Err(reason) => {
                return AgentReply::new(
                    &self.spec.name,
                    self.status,
                    format!("{}. {}", reason, field.prompt),
                );
            }
        };
        if let Err(reason) = field.validate(&value) {
            return AgentReply::new(
                &self.spec.name,
                self.status,
                format!("{}. {}", reason, field.prompt),
            );
        }

        self.collected.insert(name, value);
        self.pending_field = None;
        self.advance(ctx).await
    }
}

#[async_trait]
impl Agent for StateAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn agent_type(&self) -> &str {
        &self.spec.name
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn status(&self) -> AgentStatus {
        self.status
    }

    fn collected_fields(&self) -> Map<String, Value> {
        self.collected.clone()
    }

    fn pending_field(&self) -> Option<String> {
        self.pending_field.clone()
    }

    fn seed_fields(&mut self, args: &Map<String, Value>) -> Vec<FieldRejection> {
        let mut rejections = Vec::new();

        for (key, value) in args {
            if key == "task_instruction" {
                continue;
            }
            let Some(field) = self.spec.field(key) else {
                continue; // not in the schema
            };
            if !field.field_type.accepts(value) {
                rejections.push(FieldRejection {
                    field: key.clone(),
                    reason: format!("expected {}", field.field_type.json_type()),
                });
                continue;
            }
            if let Err(reason) = field.validate(value) {
                rejections.push(FieldRejection {
                    field: key.clone(),
                    reason,
                });
                continue;
            }
            self.collected.insert(key.clone(), value.clone());
        }

        rejections
    }

    async fn reply(&mut self, text: &str, ctx: &ToolExecutionContext) -> AgentReply {
        // Transition table: status -> handler
        match self.status {
            AgentStatus::Running | AgentStatus::Paused => self.advance(ctx).await,
            AgentStatus::WaitingForInput => self.on_input(text, ctx).await,
            AgentStatus::WaitingForApproval => {
                AgentReply::new(&self.spec.name, self.status, self.approval_prompt())
            }
            AgentStatus::Completed | AgentStatus::Error | AgentStatus::Cancelled => {
                AgentReply::error(&self.spec.name, "Agent has already finished")
            }
        }
    }

    async fn resolve_approval(
        &mut self,
        decision: ApprovalDecision,
        ctx: &ToolExecutionContext,
    ) -> AgentReply {
        match decision {
            ApprovalDecision::Approved => {
                self.approved = true;
                self.advance(ctx).await
            }
            ApprovalDecision::Edited(fields) => {
                // Re-seed and re-validate; approval is asked again with the
                // updated values
                self.seed_fields(&fields);
                self.status = AgentStatus::Running;
                self.advance(ctx).await
            }
            ApprovalDecision::Cancelled => {
                self.status = AgentStatus::Cancelled;
                AgentReply::new(&self.spec.name, self.status, "User cancelled this action.")
            }
        }
    }

    fn approval_prompt(&self) -> String {
        let mut details: Vec<String> = self
            .spec
            .input_fields
            .iter()
            .filter_map(|f| {
                self.collected
                    .get(&f.name)
                    .map(|v| format!("{}: {}", f.name, display_value(v)))
            })
            .collect();
        if details.is_empty() {
            details.push("(no parameters)".to_string());
        }
        format!(
            "About to run {}.\n{}\nReply 'approve' to continue, 'edit <field>=<value>' to change, or 'cancel'.",
            self.spec.name,
            details.join("\n")
        )
    }

    fn restore(
        &mut self,
        status: AgentStatus,
        collected: Map<String, Value>,
        pending: Option<String>,
    ) {
        self.status = status;
        self.collected = collected;
        self.pending_field = pending;
        self.approved = false;
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::registry::{FieldType, InputField};
    use serde_json::json;

    fn ctx() -> ToolExecutionContext {
        ToolExecutionContext::new("tenant-1")
    }

    fn email_agent() -> StateAgent {
        let spec = AgentSpec::new("send_email", "Send an email")
            .with_field(InputField::new("recipient", "Who should I send to?").with_validator(
                |v| {
                    if v.as_str().is_some_and(|s| s.contains('@')) {
                        Ok(())
                    } else {
                        Err("Invalid email".into())
                    }
                },
                "must contain @",
            ))
            .with_field(InputField::new("subject", "What's the subject?"))
            .with_field(InputField::new("body", "What should the email say?"));
        StateAgent::new(
            spec,
            Arc::new(SyncAction(|fields: &Map<String, Value>| {
                Ok(format!("Sent to {}", fields["recipient"].as_str().unwrap()))
            })),
            "tenant-1",
        )
    }

    #[tokio::test]
    async fn collects_missing_fields_in_order() {
        let mut agent = email_agent();
        let mut args = Map::new();
        args.insert("recipient".into(), json!("alice@x.com"));
        args.insert("task_instruction".into(), json!("send a lunch email"));
        args.insert("unknown_key".into(), json!("ignored"));
        let rejections = agent.seed_fields(&args);
        assert!(rejections.is_empty());

        let reply = agent.reply("send a lunch email", &ctx()).await;
        assert_eq!(reply.status, AgentStatus::WaitingForInput);
        assert_eq!(reply.raw_message, "What's the subject?");

        let reply = agent.reply("Re: lunch", &ctx()).await;
        assert_eq!(reply.status, AgentStatus::WaitingForInput);
        assert_eq!(reply.raw_message, "What should the email say?");

        let reply = agent.reply("See you at noon", &ctx()).await;
        assert_eq!(reply.status, AgentStatus::Completed);
        assert_eq!(reply.raw_message, "Sent to alice@x.com");
    }

    #[tokio::test]
    async fn invalid_seed_values_are_collected_from_user() {
        let mut agent = email_agent();
        let mut args = Map::new();
        args.insert("recipient".into(), json!("not-an-email"));
        let rejections = agent.seed_fields(&args);
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].field, "recipient");

        let reply = agent.reply("", &ctx()).await;
        assert_eq!(reply.status, AgentStatus::WaitingForInput);
        assert_eq!(agent.pending_field().as_deref(), Some("recipient"));
    }

    #[tokio::test]
    async fn invalid_user_answer_reprompts() {
        let mut agent = email_agent();
        let reply = agent.reply("", &ctx()).await;
        assert_eq!(reply.status, AgentStatus::WaitingForInput);

        let reply = agent.reply("bob-without-at", &ctx()).await;
        assert_eq!(reply.status, AgentStatus::WaitingForInput);
        assert!(reply.raw_message.contains("Invalid email"));
        assert!(reply.raw_message.contains("Who should I send to?"));
    }

    #[tokio::test]
    async fn approval_flow_runs_after_approve() {
        let spec = AgentSpec::new("wire_money", "Wire money")
            .with_field(InputField::new("amount", "How much?").with_type(FieldType::Int))
            .with_approval();
        let mut agent = StateAgent::new(
            spec,
            Arc::new(SyncAction(|_: &Map<String, Value>| Ok("Wired.".into()))),
            "t",
        );
        let mut args = Map::new();
        args.insert("amount".into(), json!(250));
        agent.seed_fields(&args);

        let reply = agent.reply("wire it", &ctx()).await;
        assert_eq!(reply.status, AgentStatus::WaitingForApproval);
        assert!(reply.raw_message.contains("amount: 250"));

        let reply = agent
            .resolve_approval(ApprovalDecision::Approved, &ctx())
            .await;
        assert_eq!(reply.status, AgentStatus::Completed);
        assert_eq!(reply.raw_message, "Wired.");
    }

    #[tokio::test]
    async fn cancel_resolves_without_running() {
        let spec = AgentSpec::new("wire_money", "Wire money").with_approval();
        let mut agent = StateAgent::new(
            spec,
            Arc::new(SyncAction(|_: &Map<String, Value>| {
                Err("should not run".into())
            })),
            "t",
        );
        agent.reply("", &ctx()).await;

        let reply = agent
            .resolve_approval(ApprovalDecision::Cancelled, &ctx())
            .await;
        assert_eq!(reply.status, AgentStatus::Cancelled);
        assert_eq!(reply.raw_message, "User cancelled this action.");
    }

    #[tokio::test]
    async fn edit_reseeds_and_reasks_approval() {
        let spec = AgentSpec::new("wire_money", "Wire money")
            .with_field(InputField::new("amount", "How much?").with_type(FieldType::Int))
            .with_approval();
        let mut agent = StateAgent::new(
            spec,
            Arc::new(SyncAction(|_: &Map<String, Value>| Ok("Wired.".into()))),
            "t",
        );
        let mut args = Map::new();
        args.insert("amount".into(), json!(250));
        agent.seed_fields(&args);
        agent.reply("", &ctx()).await;

        let mut edited = Map::new();
        edited.insert("amount".into(), json!(100));
        let reply = agent
            .resolve_approval(ApprovalDecision::Edited(edited), &ctx())
            .await;
        assert_eq!(reply.status, AgentStatus::WaitingForApproval);
        assert!(reply.raw_message.contains("amount: 100"));
    }
}
