//! The ReAct planning loop
//!
//! One iteration: call the LLM with the tool catalog, fan out every
//! requested tool call concurrently under per-call deadlines, append the
//! results in call order, repeat. The loop ends when the planner answers
//! in text, when an Agent-Tool parks awaiting the user, or when the turn
//! budget runs out and a final no-tools call forces a text answer.
//!
//! Provider failures never surface raw: retryable errors go through the
//! retry policy, context overflow walks the three-step recovery chain,
//! and tool failures become error-flagged tool messages for the planner.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use super::approval::{collect_batch_approvals, ApprovalRequest};
use super::config::ReactLoopConfig;
use super::context::ContextManager;
use super::domain::{AgentEvent, EventType, Message, ToolCall};
use super::error::{LlmError, OrchestratorResult};
use super::invoker::{ToolExecutionContext, ToolInvoker, ToolOutcome};
use super::llm::{ChatRequest, LlmClient, TokenUsage};

/// Channel the loop emits streaming events into
pub type EventSender = mpsc::UnboundedSender<AgentEvent>;

const TERMINAL_INSTRUCTION: &str =
    "You have executed enough steps. Provide a final answer from the information gathered so far.";

const TOO_LONG_RESPONSE: &str =
    "This conversation has grown too long to continue. Please start a new conversation.";

const ARGS_SUMMARY_CHARS: usize = 200;

/// Result status of one tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    WaitingForInput,
    WaitingForApproval,
    Error,
    None,
}

/// Per-call telemetry for a single tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Tool or Agent-Tool name
    pub name: String,
    /// Truncated argument snapshot for observability
    pub args_summary: String,
    /// Wall-clock execution time in milliseconds
    pub duration_ms: u64,
    /// Whether the call completed without error
    pub success: bool,
    /// Outcome status
    pub result_status: ResultStatus,
    /// Result size in characters before truncation
    pub result_chars: usize,
    /// Usage of the LLM turn that produced this call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_attribution: Option<TokenUsage>,
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    /// The planner produced a final text answer
    Completed,
    /// An agent is waiting for more user input
    WaitingForInput,
    /// An agent is waiting for user approval
    WaitingForApproval,
}

/// Structured result of one loop run
#[derive(Debug, Clone, Serialize)]
pub struct ReactLoopResult {
    /// Final answer, or the parked agent's prompt
    pub response: String,
    /// How the loop ended
    pub status: LoopStatus,
    /// LLM calls made
    pub turns: u32,
    /// Every tool call made during the loop, in order
    pub tool_call_records: Vec<ToolCallRecord>,
    /// Aggregate token usage across all LLM calls
    pub token_usage: TokenUsage,
    /// Total wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Approval requests parked during the final turn
    pub pending_approvals: Vec<ApprovalRequest>,
}

enum LlmTurn {
    Message(Message, TokenUsage),
    TooLong,
}

/// The iterative planner
pub struct ReactLoop {
    llm: Arc<dyn LlmClient>,
    invoker: Arc<ToolInvoker>,
    context: ContextManager,
    config: ReactLoopConfig,
}

impl ReactLoop {
    /// Build a loop over an LLM client and tool invoker
    pub fn new(llm: Arc<dyn LlmClient>, invoker: Arc<ToolInvoker>, config: ReactLoopConfig) -> Self {
        Self {
            llm,
            invoker,
            context: ContextManager::new(config.clone()),
            config,
        }
    }

    /// Run the loop to completion over the given message list
    ///
    /// Returns the structured result together with the final transcript,
    /// which the caller persists as conversation history.
    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        ctx: &ToolExecutionContext,
        events: Option<&EventSender>,
    ) -> OrchestratorResult<(ReactLoopResult, Vec<Message>)> {
        let started = Instant::now();
        let catalog = self.invoker.catalog();

        let mut total_usage = TokenUsage::default();
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut turns: u32 = 0;

        loop {
            let budget_spent = turns >= self.config.max_turns;
            if budget_spent && turns > 0 {
                messages.push(Message::user(TERMINAL_INSTRUCTION));
            }
            // The final call carries no tools, forcing a text answer
            let tools = if budget_spent { Vec::new() } else { catalog.clone() };

            messages = self.context.trim_if_needed(messages);

            let (assistant, call_usage) =
                match self.call_llm(&mut messages, tools, events).await? {
                    LlmTurn::Message(message, usage) => (message, usage),
                    LlmTurn::TooLong => {
                        messages.push(Message::assistant(TOO_LONG_RESPONSE));
                        return Ok((
                            ReactLoopResult {
                                response: TOO_LONG_RESPONSE.to_string(),
                                status: LoopStatus::Completed,
                                turns,
                                tool_call_records: records,
                                token_usage: total_usage,
                                duration_ms: started.elapsed().as_millis() as u64,
                                pending_approvals: Vec::new(),
                            },
                            messages,
                        ));
                    }
                };
            turns += 1;
            total_usage.add(call_usage);

            let tool_calls = assistant.tool_calls.clone().unwrap_or_default();
            messages.push(assistant.clone());

            // A turn with no tool calls is final, even with empty content
            if tool_calls.is_empty() || budget_spent {
                return Ok((
                    ReactLoopResult {
                        response: assistant.content,
                        status: LoopStatus::Completed,
                        turns,
                        tool_call_records: records,
                        token_usage: total_usage,
                        duration_ms: started.elapsed().as_millis() as u64,
                        pending_approvals: Vec::new(),
                    },
                    messages,
                ));
            }

            let outcomes = self
                .fan_out(&tool_calls, ctx, events)
                .await;

            let mut parked_prompts: Vec<String> = Vec::new();
            let mut approvals: Vec<ApprovalRequest> = Vec::new();

            for (call, (outcome, duration_ms)) in tool_calls.iter().zip(outcomes) {
                let record = self.record_for(call, &outcome, duration_ms, call_usage);
                emit_outcome(events, call, &outcome);

                match outcome {
                    ToolOutcome::Completed { text } => {
                        messages.push(Message::tool_result(
                            &call.id,
                            self.context.truncate_tool_result(&text),
                        ));
                    }
                    ToolOutcome::Error { message } => {
                        messages.push(Message::tool_error(&call.id, message));
                    }
                    ToolOutcome::WaitingInput { prompt, agent_id } => {
                        messages.push(Message::tool_result(&call.id, &prompt));
                        emit(
                            events,
                            AgentEvent::new(
                                EventType::StateChange,
                                json!({
                                    "agent_id": agent_id,
                                    "old_status": "running",
                                    "new_status": "waiting_for_input",
                                }),
                            ),
                        );
                        parked_prompts.push(prompt);
                    }
                    ToolOutcome::WaitingApproval {
                        request,
                        prompt,
                        agent_id,
                    } => {
                        messages.push(Message::tool_result(&call.id, &prompt));
                        emit(
                            events,
                            AgentEvent::new(
                                EventType::StateChange,
                                json!({
                                    "agent_id": agent_id,
                                    "old_status": "running",
                                    "new_status": "waiting_for_approval",
                                }),
                            ),
                        );
                        parked_prompts.push(prompt);
                        approvals.push(request);
                    }
                }

                records.push(record);
            }

            // Parked agents end the loop after every result is appended,
            // so the pairing invariant holds when the conversation resumes
            if !parked_prompts.is_empty() {
                let status = if approvals.is_empty() {
                    LoopStatus::WaitingForInput
                } else {
                    LoopStatus::WaitingForApproval
                };
                return Ok((
                    ReactLoopResult {
                        response: parked_prompts.join("\n\n"),
                        status,
                        turns,
                        tool_call_records: records,
                        token_usage: total_usage,
                        duration_ms: started.elapsed().as_millis() as u64,
                        pending_approvals: collect_batch_approvals(approvals),
                    },
                    messages,
                ));
            }
        }
    }

    /// Fan out all calls of one assistant turn concurrently
    ///
    /// Results come back in call order regardless of completion order, and
    /// one call's failure or timeout never disturbs its siblings.
    async fn fan_out(
        &self,
        calls: &[ToolCall],
        ctx: &ToolExecutionContext,
        events: Option<&EventSender>,
    ) -> Vec<(ToolOutcome, u64)> {
        for call in calls {
            emit(
                events,
                AgentEvent::new(
                    EventType::ToolCallStart,
                    json!({
                        "call_id": call.id,
                        "tool_name": call.name,
                        "tool_input": call.arguments,
                    }),
                ),
            );
        }

        futures::future::join_all(calls.iter().map(|call| async {
            let started = Instant::now();
            let outcome = self.invoker.invoke(call, ctx).await;
            (outcome, started.elapsed().as_millis() as u64)
        }))
        .await
    }

    fn record_for(
        &self,
        call: &ToolCall,
        outcome: &ToolOutcome,
        duration_ms: u64,
        usage: TokenUsage,
    ) -> ToolCallRecord {
        let (success, result_status, result_chars) = match outcome {
            ToolOutcome::Completed { text } => (true, ResultStatus::Completed, text.len()),
            ToolOutcome::WaitingInput { prompt, .. } => {
                (true, ResultStatus::WaitingForInput, prompt.len())
            }
            ToolOutcome::WaitingApproval { prompt, .. } => {
                (true, ResultStatus::WaitingForApproval, prompt.len())
            }
            ToolOutcome::Error { message } => (false, ResultStatus::Error, message.len()),
        };

        let mut args_summary = serde_json::to_string(&call.arguments).unwrap_or_default();
        if args_summary.len() > ARGS_SUMMARY_CHARS {
            let mut end = ARGS_SUMMARY_CHARS;
            while end > 0 && !args_summary.is_char_boundary(end) {
                end -= 1;
            }
            args_summary.truncate(end);
            args_summary.push_str("...");
        }

        ToolCallRecord {
            name: call.name.clone(),
            args_summary,
            duration_ms,
            success,
            result_status,
            result_chars,
            token_attribution: Some(usage),
        }
    }

    /// One LLM call under the retry policy and overflow-recovery chain
    async fn call_llm(
        &self,
        messages: &mut Vec<Message>,
        tools: Vec<super::domain::ToolSchema>,
        events: Option<&EventSender>,
    ) -> OrchestratorResult<LlmTurn> {
        // Recovery steps tried in order after a context overflow
        for step in 0..=3 {
            match self.chat_with_retry(messages, &tools, events).await {
                Ok((message, usage)) => return Ok(LlmTurn::Message(message, usage)),
                Err(LlmError::ContextOverflow) => {
                    let current = std::mem::take(messages);
                    *messages = match step {
                        0 => self.context.trim_if_needed(current),
                        1 => self.context.truncate_all_tool_results(current),
                        2 => self.context.force_trim(current),
                        _ => {
                            tracing::warn!("context overflow persisted through recovery chain");
                            *messages = current;
                            return Ok(LlmTurn::TooLong);
                        }
                    };
                    tracing::info!(step, "context overflow; applied recovery step");
                }
                Err(other) => return Err(other.into()),
            }
        }
        Ok(LlmTurn::TooLong)
    }

    /// Retry policy: back off on rate limits, retry timeouts once,
    /// retry transients up to the configured cap
    async fn chat_with_retry(
        &self,
        messages: &[Message],
        tools: &[super::domain::ToolSchema],
        events: Option<&EventSender>,
    ) -> Result<(Message, TokenUsage), LlmError> {
        let mut attempt: u32 = 0;
        let mut timeout_retried = false;

        loop {
            let result = self.chat_turn(messages, tools, events).await;
            let error = match result {
                Ok(turn) => return Ok(turn),
                Err(e) => e,
            };

            match &error {
                LlmError::RateLimit if attempt < self.config.llm_max_retries => {
                    let delay = self.config.llm_retry_base_delay * 2f64.powi(attempt as i32);
                    tracing::warn!(attempt, delay_s = delay, "rate limited; backing off");
                    tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                    attempt += 1;
                }
                LlmError::Timeout if !timeout_retried => {
                    tracing::warn!("LLM call timed out; retrying once");
                    timeout_retried = true;
                }
                LlmError::Transient(reason) if attempt < self.config.llm_max_retries => {
                    tracing::warn!(attempt, reason, "transient LLM error; retrying");
                    tokio::time::sleep(std::time::Duration::from_secs_f64(
                        self.config.llm_retry_base_delay,
                    ))
                    .await;
                    attempt += 1;
                }
                _ => return Err(error),
            }
        }
    }

    /// A single provider call, streaming when an event channel is attached
    async fn chat_turn(
        &self,
        messages: &[Message],
        tools: &[super::domain::ToolSchema],
        events: Option<&EventSender>,
    ) -> Result<(Message, TokenUsage), LlmError> {
        let request = ChatRequest::new(messages.to_vec(), tools.to_vec());

        let Some(events) = events else {
            let response = self.llm.chat(request).await?;
            let usage = response.usage.unwrap_or_default();
            return Ok((response.message, usage));
        };

        emit(Some(events), AgentEvent::new(EventType::MessageStart, json!({})));

        let mut stream = self.llm.stream(request);
        let mut content = String::new();
        let mut accumulator = super::llm::ToolCallAccumulator::new();
        let mut usage = TokenUsage::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if !chunk.content.is_empty() {
                content.push_str(&chunk.content);
                emit(Some(events), AgentEvent::chunk(&chunk.content));
            }
            for delta in &chunk.tool_calls {
                accumulator.apply(delta);
            }
            if let Some(reported) = chunk.usage {
                usage = reported;
            }
        }

        emit(Some(events), AgentEvent::new(EventType::MessageEnd, json!({})));

        let tool_calls = accumulator.build();
        let message = if tool_calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_with_tools(content, tool_calls)
        };
        Ok((message, usage))
    }
}

fn emit(events: Option<&EventSender>, event: AgentEvent) {
    if let Some(sender) = events {
        let _ = sender.send(event);
    }
}

fn emit_outcome(events: Option<&EventSender>, call: &ToolCall, outcome: &ToolOutcome) {
    let Some(sender) = events else { return };

    match outcome {
        ToolOutcome::Error { message } => {
            let _ = sender.send(AgentEvent::new(
                EventType::Error,
                json!({
                    "call_id": call.id,
                    "tool_name": call.name,
                    "error": message,
                }),
            ));
        }
        other => {
            let _ = sender.send(AgentEvent::new(
                EventType::ToolCallEnd,
                json!({ "call_id": call.id, "tool_name": call.name }),
            ));
            let result = match other {
                ToolOutcome::Completed { text } => text.clone(),
                ToolOutcome::WaitingInput { prompt, .. } => prompt.clone(),
                ToolOutcome::WaitingApproval { prompt, .. } => prompt.clone(),
                ToolOutcome::Error { .. } => unreachable!(),
            };
            let _ = sender.send(AgentEvent::new(
                EventType::ToolResult,
                json!({
                    "call_id": call.id,
                    "tool_name": call.name,
                    "result": result,
                    "success": true,
                }),
            ));
        }
    }
}
