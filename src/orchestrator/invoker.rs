//! Tool dispatch
//!
//! Routes a planner tool call to either a plain tool or an Agent-Tool,
//! each under its own deadline. A failure or timeout in one call never
//! escapes as an error; outcomes are a tagged union the loop pattern-
//! matches on, and failures become error-flagged tool messages the
//! planner sees and reacts to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};

use super::approval::{build_approval_request, ApprovalRequest};
use super::config::ReactLoopConfig;
use super::credentials::CredentialStore;
use super::domain::{now_millis, AgentStatus, ToolCall, ToolSchema};
use super::pool::AgentPool;
use super::registry::AgentRegistry;

/// Context handed to every tool execution
#[derive(Clone)]
pub struct ToolExecutionContext {
    /// Tenant on whose behalf the call runs
    pub tenant_id: String,
    /// Credential store handle, when one is configured
    pub credentials: Option<Arc<dyn CredentialStore>>,
    /// Arbitrary request metadata
    pub metadata: Map<String, Value>,
}

impl ToolExecutionContext {
    /// Context for a tenant with no credentials and empty metadata
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            credentials: None,
            metadata: Map::new(),
        }
    }

    /// Attach a credential store handle
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Attach request metadata
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A plain (stateless) tool callable by the planner
#[async_trait]
pub trait Tool: Send + Sync {
    /// Schema advertised to the LLM
    fn schema(&self) -> ToolSchema;

    /// Execute with the given arguments
    async fn execute(&self, arguments: Value, ctx: &ToolExecutionContext)
        -> Result<String, String>;
}

/// Registry of plain tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its schema name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.schema().name, tool);
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Schemas of all registered tools
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}

/// Outcome of one tool invocation
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    /// The call produced a final result
    Completed { text: String },
    /// An Agent-Tool parked waiting for more user input
    WaitingInput { prompt: String, agent_id: String },
    /// An Agent-Tool parked waiting for user approval
    WaitingApproval {
        request: ApprovalRequest,
        prompt: String,
        agent_id: String,
    },
    /// The call failed; the planner decides what to do next
    Error { message: String },
}

impl ToolOutcome {
    /// Whether the loop must break after appending this turn's results
    pub fn is_parked(&self) -> bool {
        matches!(
            self,
            ToolOutcome::WaitingInput { .. } | ToolOutcome::WaitingApproval { .. }
        )
    }
}

/// Triggered-task identifier carried in the request metadata, if any
fn task_id(ctx: &ToolExecutionContext) -> Option<String> {
    ctx.metadata
        .get("task_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Dispatches tool calls to plain tools and Agent-Tools
pub struct ToolInvoker {
    tools: Arc<ToolRegistry>,
    agents: Arc<AgentRegistry>,
    pool: Arc<AgentPool>,
    config: ReactLoopConfig,
}

impl ToolInvoker {
    /// Create an invoker over the given registries and pool
    pub fn new(
        tools: Arc<ToolRegistry>,
        agents: Arc<AgentRegistry>,
        pool: Arc<AgentPool>,
        config: ReactLoopConfig,
    ) -> Self {
        Self {
            tools,
            agents,
            pool,
            config,
        }
    }

    /// The planner's tool catalog: plain tools plus exposed Agent-Tools
    pub fn catalog(&self) -> Vec<ToolSchema> {
        let mut schemas = self.tools.schemas();
        schemas.extend(self.agents.tool_schemas());
        schemas
    }

    /// Execute one tool call under the appropriate timeout
    pub async fn invoke(&self, call: &ToolCall, ctx: &ToolExecutionContext) -> ToolOutcome {
        let Some(args) = call.arguments.as_object() else {
            return ToolOutcome::Error {
                message: format!("Arguments for tool {} must be a JSON object", call.name),
            };
        };

        if let Some(tool) = self.tools.get(&call.name) {
            return self.invoke_plain(tool, call, ctx).await;
        }

        if self
            .agents
            .spec(&call.name)
            .is_some_and(|spec| spec.expose_as_tool)
        {
            return self.invoke_agent(call, args, ctx).await;
        }

        ToolOutcome::Error {
            message: format!("Tool {} is not registered", call.name),
        }
    }

    async fn invoke_plain(
        &self,
        tool: Arc<dyn Tool>,
        call: &ToolCall,
        ctx: &ToolExecutionContext,
    ) -> ToolOutcome {
        let deadline = Duration::from_secs(self.config.tool_execution_timeout);
        let execution =
            std::panic::AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx)).catch_unwind();

        match tokio::time::timeout(deadline, execution).await {
            Err(_) => ToolOutcome::Error {
                message: format!(
                    "Tool {} timed out after {}s",
                    call.name, self.config.tool_execution_timeout
                ),
            },
            Ok(Err(_panic)) => ToolOutcome::Error {
                message: format!("Tool {} failed unexpectedly", call.name),
            },
            Ok(Ok(Err(message))) => ToolOutcome::Error { message },
            Ok(Ok(Ok(text))) => ToolOutcome::Completed { text },
        }
    }

    /// Agent-Tool path: instantiate, seed fields, drive to the first stop
    ///
    /// A timeout before the agent reaches a waiting state discards the
    /// instance; partial state is never pooled.
    async fn invoke_agent(
        &self,
        call: &ToolCall,
        args: &Map<String, Value>,
        ctx: &ToolExecutionContext,
    ) -> ToolOutcome {
        let Some(mut agent) = self.agents.instantiate(&call.name, &ctx.tenant_id) else {
            return ToolOutcome::Error {
                message: format!("Unknown agent: {}", call.name),
            };
        };

        let rejections = agent.seed_fields(args);
        for rejection in &rejections {
            tracing::debug!(
                agent = %call.name,
                field = %rejection.field,
                reason = %rejection.reason,
                "rejected seeded field"
            );
        }

        let task_instruction = args
            .get("task_instruction")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let deadline = Duration::from_secs(self.config.agent_tool_execution_timeout);
        let reply = match tokio::time::timeout(deadline, agent.reply(&task_instruction, ctx)).await
        {
            Ok(reply) => reply,
            Err(_) => {
                return ToolOutcome::Error {
                    message: format!(
                        "Agent {} timed out after {}s",
                        call.name, self.config.agent_tool_execution_timeout
                    ),
                }
            }
        };

        match reply.status {
            AgentStatus::Completed => ToolOutcome::Completed {
                text: reply.raw_message,
            },
            AgentStatus::WaitingForInput => {
                let agent_id = agent.agent_id().to_string();
                if let Err(e) = self
                    .pool
                    .park(agent, Some(call.id.clone()), None, task_id(ctx))
                    .await
                {
                    tracing::warn!(error = %e, "failed to persist parked agent");
                }
                ToolOutcome::WaitingInput {
                    prompt: reply.raw_message,
                    agent_id,
                }
            }
            AgentStatus::WaitingForApproval => {
                let agent_id = agent.agent_id().to_string();
                let request =
                    build_approval_request(agent.as_ref(), self.config.approval_timeout_minutes);
                let deadline = now_millis() + self.config.approval_timeout_minutes * 60_000;
                if let Err(e) = self
                    .pool
                    .park(agent, Some(call.id.clone()), Some(deadline), task_id(ctx))
                    .await
                {
                    tracing::warn!(error = %e, "failed to persist parked agent");
                }
                ToolOutcome::WaitingApproval {
                    request,
                    prompt: reply.raw_message,
                    agent_id,
                }
            }
            AgentStatus::Error => ToolOutcome::Error {
                message: reply
                    .error_message
                    .unwrap_or_else(|| "Unknown agent error".to_string()),
            },
            other => ToolOutcome::Completed {
                text: format!("Agent finished with status: {}", other),
            },
        }
    }
}
