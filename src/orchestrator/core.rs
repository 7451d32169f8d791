//! Per-message orchestration lifecycle
//!
//! For each incoming user message: build the LLM message list from memory,
//! gate it through policy, route it to a pending agent when one is parked
//! for the tenant, otherwise (or afterwards) run the ReAct loop, then
//! persist the conversation. `handle_message` returns the structured loop
//! result; `stream_message` runs the same lifecycle and emits events.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter,
};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::approval::{build_approval_request, parse_approval_response};
use super::config::{PoolConfig, ReactLoopConfig};
use super::credentials::{CredentialStore, InMemoryCredentialStore};
use super::domain::{now_millis, AgentEvent, AgentStatus, EventType, Message, Role, ToolCall};
use super::error::OrchestratorResult;
use super::invoker::{ToolExecutionContext, ToolInvoker, ToolRegistry};
use super::llm::{LlmClient, TokenUsage};
use super::memory::{Fact, InMemoryMemory, MemoryProvider};
use super::persistence::{FilePoolStore, PoolStore};
use super::pool::AgentPool;
use super::react::{EventSender, LoopStatus, ReactLoop, ReactLoopResult};
use super::registry::AgentRegistry;
use super::triggers::{NullTriggerEngine, PendingApproval, TriggerEngine, TriggerEvent};

type TenantRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const DEFAULT_PERSONA: &str = "You are a capable personal assistant. \
    Use the available tools to act on the user's behalf, and answer in plain language.";

const RATE_LIMIT_RESPONSE: &str =
    "You're sending messages too quickly. Please wait a moment and try again.";

const RECALL_LIMIT: usize = 5;

/// Per-tenant rate limit applied in `should_process`
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    /// Sustained requests per second per tenant
    pub requests_per_second: u32,
    /// Burst allowance
    pub burst_size: u32,
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    llm: Arc<dyn LlmClient>,
    config: ReactLoopConfig,
    pool_config: PoolConfig,
    tools: ToolRegistry,
    agents: AgentRegistry,
    memory: Option<Arc<dyn MemoryProvider>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    trigger_engine: Option<Arc<dyn TriggerEngine>>,
    pool_store: Option<Arc<dyn PoolStore>>,
    persona: String,
    rate_limit: Option<RateLimitSettings>,
}

impl OrchestratorBuilder {
    /// Override the loop configuration
    pub fn with_config(mut self, config: ReactLoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the pool configuration
    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Install the plain-tool registry
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Install the agent registry
    pub fn with_agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    /// Install a memory provider
    pub fn with_memory(mut self, memory: Arc<dyn MemoryProvider>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Install a credential store
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Install a trigger engine
    pub fn with_trigger_engine(mut self, engine: Arc<dyn TriggerEngine>) -> Self {
        self.trigger_engine = Some(engine);
        self
    }

    /// Install a pool persistence store
    pub fn with_pool_store(mut self, store: Arc<dyn PoolStore>) -> Self {
        self.pool_store = Some(store);
        self
    }

    /// Override the persona used in the system prompt
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// Enable per-tenant rate limiting
    pub fn with_rate_limit(mut self, settings: RateLimitSettings) -> Self {
        self.rate_limit = Some(settings);
        self
    }

    /// Assemble the orchestrator
    pub fn build(self) -> OrchestratorResult<Arc<Orchestrator>> {
        let agents = Arc::new(self.agents);
        let tools = Arc::new(self.tools);

        let pool_store = match (&self.pool_store, &self.pool_config.persist_dir) {
            (Some(store), _) => Some(store.clone()),
            (None, Some(dir)) => Some(Arc::new(FilePoolStore::new(dir)?) as Arc<dyn PoolStore>),
            (None, None) => None,
        };
        let pool = Arc::new(AgentPool::new(
            self.pool_config.clone(),
            agents.clone(),
            pool_store,
        ));

        let invoker = Arc::new(ToolInvoker::new(
            tools,
            agents.clone(),
            pool.clone(),
            self.config.clone(),
        ));
        let react = ReactLoop::new(self.llm.clone(), invoker, self.config.clone());

        let rate_limiter = self.rate_limit.map(|settings| {
            let quota = Quota::per_second(
                NonZeroU32::new(settings.requests_per_second)
                    .unwrap_or(NonZeroU32::new(1).unwrap()),
            )
            .allow_burst(NonZeroU32::new(settings.burst_size).unwrap_or(NonZeroU32::new(1).unwrap()));
            Arc::new(RateLimiter::keyed(quota))
        });

        Ok(Arc::new(Orchestrator {
            config: self.config,
            agents,
            pool,
            react,
            memory: self
                .memory
                .unwrap_or_else(|| Arc::new(InMemoryMemory::new())),
            credentials: self
                .credentials
                .unwrap_or_else(|| Arc::new(InMemoryCredentialStore::new())),
            trigger_engine: self
                .trigger_engine
                .unwrap_or_else(|| Arc::new(NullTriggerEngine)),
            persona: self.persona,
            rate_limiter,
            tenant_locks: std::sync::Mutex::new(HashMap::new()),
            sweeper: std::sync::Mutex::new(None),
        }))
    }
}

/// Central coordinator for all agents
pub struct Orchestrator {
    config: ReactLoopConfig,
    agents: Arc<AgentRegistry>,
    pool: Arc<AgentPool>,
    react: ReactLoop,
    memory: Arc<dyn MemoryProvider>,
    credentials: Arc<dyn CredentialStore>,
    trigger_engine: Arc<dyn TriggerEngine>,
    persona: String,
    rate_limiter: Option<Arc<TenantRateLimiter>>,
    tenant_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    sweeper: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

enum PendingRoute {
    /// No pending agent; proceed to the loop
    None,
    /// Respond directly without entering the loop
    Direct(ReactLoopResult),
    /// The agent finished; append the pair and enter the loop
    Resume {
        assistant: Message,
        tool_message: Message,
    },
}

impl Orchestrator {
    /// Start building an orchestrator over an LLM client
    pub fn builder(llm: Arc<dyn LlmClient>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            llm,
            config: ReactLoopConfig::default(),
            pool_config: PoolConfig::default(),
            tools: ToolRegistry::new(),
            agents: AgentRegistry::new(),
            memory: None,
            credentials: None,
            trigger_engine: None,
            pool_store: None,
            persona: DEFAULT_PERSONA.to_string(),
            rate_limit: None,
        }
    }

    /// Restore persisted pool entries and start the background sweeper
    pub async fn start(self: &Arc<Self>) -> OrchestratorResult<()> {
        self.pool.restore().await?;

        let trigger_engine = self.trigger_engine.clone();
        let handle = self.pool.spawn_sweeper(move |lapsed| {
            let engine = trigger_engine.clone();
            tokio::spawn(async move {
                for entry in lapsed {
                    if let Some(task_id) = &entry.task_id {
                        engine.mark_expired(task_id).await;
                    }
                }
            });
        });
        *self.sweeper.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop background work
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Handle one user message to completion
    pub async fn handle_message(
        &self,
        tenant_id: &str,
        text: &str,
        metadata: Option<Map<String, Value>>,
    ) -> OrchestratorResult<ReactLoopResult> {
        self.process(tenant_id, text, metadata.unwrap_or_default(), None)
            .await
    }

    /// Handle a trigger firing as a virtual user message
    pub async fn handle_trigger(&self, event: TriggerEvent) -> OrchestratorResult<ReactLoopResult> {
        let metadata = event.metadata();
        self.process(&event.tenant_id, &event.content, metadata, None)
            .await
    }

    /// Handle one user message, emitting streaming events
    ///
    /// The returned stream ends with a `Done` event; errors surface as an
    /// `Error` event before it.
    pub fn stream_message(
        self: Arc<Self>,
        tenant_id: String,
        text: String,
        metadata: Option<Map<String, Value>>,
    ) -> UnboundedReceiverStream<AgentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let result = self
                .process(&tenant_id, &text, metadata.unwrap_or_default(), Some(&tx))
                .await;
            if let Err(e) = result {
                let _ = tx.send(AgentEvent::error(e.to_string()));
            }
            let _ = tx.send(AgentEvent::done());
        });

        UnboundedReceiverStream::new(rx)
    }

    /// Pending approvals for a tenant, with their originating task
    pub async fn list_pending_approvals(&self, tenant_id: &str) -> Vec<PendingApproval> {
        let mut pending = Vec::new();
        for entry in self.pool.waiting_approvals(tenant_id).await {
            let Some(handle) = self.pool.get(tenant_id, &entry.agent_id).await else {
                continue;
            };
            let agent = handle.lock().await;
            pending.push(PendingApproval {
                request: build_approval_request(&**agent, self.config.approval_timeout_minutes),
                source: if entry.task_id.is_some() {
                    "trigger".to_string()
                } else {
                    "user".to_string()
                },
                task_id: entry.task_id.clone(),
            });
        }
        pending
    }

    /// Cancel a pooled agent; returns whether one was removed
    pub async fn cancel_agent(&self, tenant_id: &str, agent_id: &str) -> OrchestratorResult<bool> {
        let existed = self.pool.get(tenant_id, agent_id).await.is_some();
        if existed {
            self.pool.remove(tenant_id, agent_id).await?;
        }
        Ok(existed)
    }

    // ------------------------------------------------------------------
    // Shared lifecycle
    // ------------------------------------------------------------------

    async fn process(
        &self,
        tenant_id: &str,
        text: &str,
        metadata: Map<String, Value>,
        events: Option<&EventSender>,
    ) -> OrchestratorResult<ReactLoopResult> {
        // Messages for one tenant are handled strictly in order
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;

        if !self.should_process(tenant_id, text).await {
            let result = direct_result(RATE_LIMIT_RESPONSE, LoopStatus::Completed, Vec::new());
            emit_direct_response(events, &result.response);
            return Ok(result);
        }

        let (mut messages, ctx) = self.prepare_context(tenant_id, text, metadata).await;

        match self.check_pending_agents(tenant_id, text, &ctx, events).await? {
            PendingRoute::Direct(result) => {
                emit_direct_response(events, &result.response);
                let mut transcript = messages;
                transcript.push(Message::assistant(&result.response));
                self.post_process(tenant_id, transcript).await;
                return Ok(result);
            }
            PendingRoute::Resume {
                assistant,
                tool_message,
            } => {
                messages.push(assistant);
                messages.push(tool_message);
            }
            PendingRoute::None => {}
        }

        let (result, transcript) = self.react.run(messages, &ctx, events).await?;
        self.post_process(tenant_id, transcript).await;
        Ok(result)
    }

    /// Policy gate; rejections short-circuit before the loop
    async fn should_process(&self, tenant_id: &str, _text: &str) -> bool {
        match &self.rate_limiter {
            Some(limiter) => limiter.check_key(&tenant_id.to_string()).is_ok(),
            None => true,
        }
    }

    /// Assemble the LLM message list and execution context
    async fn prepare_context(
        &self,
        tenant_id: &str,
        text: &str,
        metadata: Map<String, Value>,
    ) -> (Vec<Message>, ToolExecutionContext) {
        let history = match self
            .memory
            .get_history(tenant_id, tenant_id, self.config.max_history_messages)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load history");
                Vec::new()
            }
        };

        let facts = match self.memory.search(tenant_id, text, RECALL_LIMIT).await {
            Ok(facts) => facts,
            Err(e) => {
                tracing::warn!(error = %e, "memory recall failed");
                Vec::new()
            }
        };

        let mut messages = vec![Message::system(build_system_prompt(&self.persona, &facts))];
        messages.extend(history);
        messages.push(Message::user(text));

        let ctx = ToolExecutionContext::new(tenant_id)
            .with_credentials(self.credentials.clone())
            .with_metadata(metadata);

        (messages, ctx)
    }

    /// Route the message to the oldest pending agent, if one exists
    async fn check_pending_agents(
        &self,
        tenant_id: &str,
        text: &str,
        ctx: &ToolExecutionContext,
        events: Option<&EventSender>,
    ) -> OrchestratorResult<PendingRoute> {
        let Some((entry, handle)) = self.pool.find_pending(tenant_id).await else {
            return Ok(PendingRoute::None);
        };

        let mut agent = handle.lock().await;
        let before: HashSet<String> = entry.collected_fields.keys().cloned().collect();

        let reply = if entry.status == AgentStatus::WaitingForApproval {
            match parse_approval_response(text) {
                Some(decision) => agent.resolve_approval(decision, ctx).await,
                None => {
                    // Not a decision; surface the request again
                    let request =
                        build_approval_request(&**agent, self.config.approval_timeout_minutes);
                    let prompt = request.action_summary.clone();
                    drop(agent);
                    return Ok(PendingRoute::Direct(direct_result(
                        &prompt,
                        LoopStatus::WaitingForApproval,
                        vec![request],
                    )));
                }
            }
        } else {
            agent.reply(text, ctx).await
        };

        emit_field_events(events, &before, &agent.collected_fields(), &reply);

        let status = reply.status;
        let approvals = if status == AgentStatus::WaitingForApproval {
            vec![build_approval_request(
                &**agent,
                self.config.approval_timeout_minutes,
            )]
        } else {
            Vec::new()
        };
        drop(agent);

        // Re-snapshot or drop the entry; terminal agents leave the pool
        let approval_deadline = (status == AgentStatus::WaitingForApproval)
            .then(|| now_millis() + self.config.approval_timeout_minutes * 60_000);
        self.pool
            .refresh(tenant_id, &entry.agent_id, approval_deadline)
            .await?;

        if status.is_waiting() {
            emit(
                events,
                AgentEvent::state_change(entry.status.to_string(), status.to_string()),
            );
            let loop_status = if status == AgentStatus::WaitingForApproval {
                LoopStatus::WaitingForApproval
            } else {
                LoopStatus::WaitingForInput
            };
            return Ok(PendingRoute::Direct(direct_result(
                &reply.raw_message,
                loop_status,
                approvals,
            )));
        }

        // Agent finished: hand its outcome back to the planner as a
        // synthetic assistant/tool pair so follow-up work can happen
        emit(
            events,
            AgentEvent::state_change(entry.status.to_string(), status.to_string()),
        );
        let call_id = ToolCall::generate_id();
        let assistant = Message::assistant_with_tools(
            "",
            vec![ToolCall::new(
                &call_id,
                &entry.agent_type,
                Value::Object(entry.collected_fields.clone()),
            )],
        );
        let tool_message = match status {
            AgentStatus::Error => Message::tool_error(
                &call_id,
                reply
                    .error_message
                    .unwrap_or_else(|| "Unknown agent error".to_string()),
            ),
            AgentStatus::Cancelled => Message::tool_error(&call_id, "User cancelled this action."),
            _ => Message::tool_result(&call_id, &reply.raw_message),
        };

        Ok(PendingRoute::Resume {
            assistant,
            tool_message,
        })
    }

    /// Persist history and hand the exchange to long-term extraction
    async fn post_process(&self, tenant_id: &str, transcript: Vec<Message>) {
        let history: Vec<Message> = transcript
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();

        if let Err(e) = self
            .memory
            .save_history(tenant_id, tenant_id, history.clone())
            .await
        {
            tracing::warn!(error = %e, "failed to persist history");
        }

        // Long-term extraction runs off the request path
        let memory = self.memory.clone();
        let tenant = tenant_id.to_string();
        let tail: Vec<Message> = history
            .into_iter()
            .rev()
            .take(2)
            .rev()
            .collect();
        tokio::spawn(async move {
            if let Err(e) = memory.add(&tenant, &tail).await {
                tracing::debug!(error = %e, "memory extraction failed");
            }
        });
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.tenant_locks.lock().unwrap();
        locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Pool handle, for management surfaces
    pub fn pool(&self) -> &Arc<AgentPool> {
        &self.pool
    }

    /// Registry handle
    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }
}

fn build_system_prompt(persona: &str, facts: &[Fact]) -> String {
    let mut prompt = persona.to_string();
    prompt.push_str(&format!(
        "\n\nCurrent time: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M UTC")
    ));
    if !facts.is_empty() {
        prompt.push_str("\n\nRelevant facts about the user:");
        for fact in facts {
            prompt.push_str(&format!("\n- {}", fact.content));
        }
    }
    prompt
}

fn direct_result(
    response: &str,
    status: LoopStatus,
    pending_approvals: Vec<super::approval::ApprovalRequest>,
) -> ReactLoopResult {
    ReactLoopResult {
        response: response.to_string(),
        status,
        turns: 0,
        tool_call_records: Vec::new(),
        token_usage: TokenUsage::default(),
        duration_ms: 0,
        pending_approvals,
    }
}

fn emit(events: Option<&EventSender>, event: AgentEvent) {
    if let Some(sender) = events {
        let _ = sender.send(event);
    }
}

fn emit_direct_response(events: Option<&EventSender>, response: &str) {
    let Some(sender) = events else { return };
    let _ = sender.send(AgentEvent::new(EventType::MessageStart, json!({})));
    let _ = sender.send(AgentEvent::chunk(response));
    let _ = sender.send(AgentEvent::new(EventType::MessageEnd, json!({})));
}

fn emit_field_events(
    events: Option<&EventSender>,
    before: &HashSet<String>,
    after: &Map<String, Value>,
    reply: &super::domain::AgentReply,
) {
    let Some(sender) = events else { return };

    for key in after.keys().filter(|k| !before.contains(*k)) {
        let _ = sender.send(AgentEvent::new(
            EventType::FieldValidated,
            json!({ "field": key, "valid": true }),
        ));
        let _ = sender.send(AgentEvent::new(
            EventType::FieldCollected,
            json!({ "field": key, "value": after[key] }),
        ));
    }

    // A reply that stays in WaitingForInput with no new field means the
    // answer failed validation
    if reply.status == AgentStatus::WaitingForInput
        && after.keys().filter(|k| !before.contains(*k)).count() == 0
    {
        let _ = sender.send(AgentEvent::new(
            EventType::FieldValidated,
            json!({ "valid": false }),
        ));
    }
}
