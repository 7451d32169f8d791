//! Shared test fixtures: a scripted LLM client and mock tools

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use concierge::orchestrator::domain::{Message, ToolCall, ToolSchema};
use concierge::orchestrator::error::{LlmError, LlmResult};
use concierge::orchestrator::invoker::{Tool, ToolExecutionContext};
use concierge::orchestrator::llm::{
    ChatRequest, ChatResponse, LlmClient, LlmStream, StreamChunk, TokenUsage, ToolCallDelta,
};

/// One scripted planner turn
pub enum Step {
    /// Respond with plain text
    Text(String),
    /// Respond with tool calls
    Calls(Vec<ToolCall>),
    /// Fail with the given error
    Error(LlmError),
}

impl Step {
    pub fn text(s: impl Into<String>) -> Self {
        Step::Text(s.into())
    }

    pub fn call(id: &str, name: &str, arguments: Value) -> Self {
        Step::Calls(vec![ToolCall::new(id, name, arguments)])
    }

    pub fn overflow() -> Self {
        Step::Error(LlmError::ContextOverflow)
    }
}

/// LLM client that replays a fixed script and records every request
pub struct ScriptedLlm {
    steps: Mutex<VecDeque<Step>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn next(&self) -> Step {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Error(LlmError::Fatal("script exhausted".into())))
    }

    /// Number of LLM requests made so far
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The last recorded request
    pub fn last_request(&self) -> ChatRequest {
        self.requests.lock().unwrap().last().cloned().expect("no requests made")
    }
}

fn usage() -> TokenUsage {
    TokenUsage::new(100, 10)
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest) -> LlmResult<ChatResponse> {
        self.requests.lock().unwrap().push(request);
        match self.next() {
            Step::Text(text) => Ok(ChatResponse {
                message: Message::assistant(text),
                usage: Some(usage()),
            }),
            Step::Calls(calls) => Ok(ChatResponse {
                message: Message::assistant_with_tools("", calls),
                usage: Some(usage()),
            }),
            Step::Error(e) => Err(e),
        }
    }

    fn stream(&self, request: ChatRequest) -> LlmStream {
        self.requests.lock().unwrap().push(request);
        let step = self.next();
        let (tx, stream) = LlmStream::channel(16);

        tokio::spawn(async move {
            match step {
                Step::Text(text) => {
                    tx.send(StreamChunk::text(text)).await;
                    tx.send(StreamChunk {
                        usage: Some(usage()),
                        ..Default::default()
                    })
                    .await;
                }
                Step::Calls(calls) => {
                    for (index, call) in calls.into_iter().enumerate() {
                        tx.send(StreamChunk {
                            tool_calls: vec![ToolCallDelta {
                                index,
                                id: Some(call.id),
                                name: Some(call.name),
                                arguments: Some(call.arguments.to_string()),
                            }],
                            ..Default::default()
                        })
                        .await;
                    }
                    tx.send(StreamChunk {
                        usage: Some(usage()),
                        ..Default::default()
                    })
                    .await;
                }
                Step::Error(e) => {
                    tx.send_error(e).await;
                }
            }
        });

        stream
    }
}

/// Weather lookup mock; Tokyo answers slowly to shake out ordering bugs
pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "get_weather",
            "Get current weather for a city",
            json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            }),
        )
    }

    async fn execute(
        &self,
        arguments: Value,
        _ctx: &ToolExecutionContext,
    ) -> Result<String, String> {
        let city = arguments["city"].as_str().unwrap_or("unknown");
        if city == "Tokyo" {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(json!({ "city": city, "temp_c": 18, "cond": "clear" }).to_string())
    }
}

/// Tool that never completes within any reasonable deadline
pub struct NeverFinishesTool;

#[async_trait]
impl Tool for NeverFinishesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "fetch_archive",
            "Fetch a very large archive",
            json!({ "type": "object", "properties": {} }),
        )
    }

    async fn execute(
        &self,
        _arguments: Value,
        _ctx: &ToolExecutionContext,
    ) -> Result<String, String> {
        tokio::time::sleep(Duration::from_secs(86_400)).await;
        Ok("done".into())
    }
}
