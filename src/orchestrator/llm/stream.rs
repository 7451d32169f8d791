//! Streaming types for LLM responses

use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::orchestrator::domain::{Message, ToolCall};
use crate::orchestrator::error::LlmError;

use super::TokenUsage;

/// A chunk of streamed LLM response
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    /// Delta content (text being generated)
    pub content: String,
    /// Tool call deltas carried by this chunk
    pub tool_calls: Vec<ToolCallDelta>,
    /// Token usage (usually only in the final chunk)
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    /// Create a text content chunk
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Delta update for one tool call position in a streamed response
#[derive(Debug, Clone)]
pub struct ToolCallDelta {
    /// Index of the tool call being updated
    pub index: usize,
    /// Tool call ID (may arrive in fragments)
    pub id: Option<String>,
    /// Tool name (may arrive in fragments)
    pub name: Option<String>,
    /// Arguments JSON fragment
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    /// Create an empty delta for an index
    pub fn new(index: usize) -> Self {
        Self {
            index,
            id: None,
            name: None,
            arguments: None,
        }
    }
}

/// Accumulator for building complete tool calls from streaming deltas
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    builders: Vec<PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    /// Create a new accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a delta update
    pub fn apply(&mut self, delta: &ToolCallDelta) {
        while self.builders.len() <= delta.index {
            self.builders.push(PartialCall::default());
        }
        let builder = &mut self.builders[delta.index];
        if let Some(id) = &delta.id {
            builder.id.push_str(id);
        }
        if let Some(name) = &delta.name {
            builder.name.push_str(name);
        }
        if let Some(args) = &delta.arguments {
            builder.arguments.push_str(args);
        }
    }

    /// Build the final tool calls, dropping incomplete positions
    pub fn build(self) -> Vec<ToolCall> {
        self.builders
            .into_iter()
            .filter(|b| !b.id.is_empty() && !b.name.is_empty())
            .map(|b| ToolCall {
                id: b.id,
                name: b.name,
                arguments: serde_json::from_str(&b.arguments)
                    .unwrap_or(Value::Object(Default::default())),
            })
            .collect()
    }
}

/// Streaming response from an LLM provider
pub struct LlmStream {
    receiver: mpsc::Receiver<Result<StreamChunk, LlmError>>,
}

impl LlmStream {
    /// Create a channel pair for building an LLM stream
    pub fn channel(buffer: usize) -> (LlmStreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (LlmStreamSender { sender: tx }, Self { receiver: rx })
    }

    /// Drain the stream into a complete assistant message plus usage
    pub async fn collect(mut self) -> Result<(Message, Option<TokenUsage>), LlmError> {
        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut usage = None;

        while let Some(result) = self.receiver.recv().await {
            let chunk = result?;
            content.push_str(&chunk.content);
            for delta in &chunk.tool_calls {
                accumulator.apply(delta);
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }

        let tool_calls = accumulator.build();
        let message = if tool_calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_with_tools(content, tool_calls)
        };
        Ok((message, usage))
    }
}

impl Stream for LlmStream {
    type Item = Result<StreamChunk, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// Sender half for building an LLM stream
#[derive(Clone)]
pub struct LlmStreamSender {
    sender: mpsc::Sender<Result<StreamChunk, LlmError>>,
}

impl LlmStreamSender {
    /// Send a chunk
    pub async fn send(&self, chunk: StreamChunk) -> bool {
        self.sender.send(Ok(chunk)).await.is_ok()
    }

    /// Send an error
    pub async fn send_error(&self, error: LlmError) -> bool {
        self.sender.send(Err(error)).await.is_ok()
    }
}
