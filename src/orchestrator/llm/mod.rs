//! LLM provider boundary
//!
//! The orchestrator talks to any chat-completion provider through the
//! [`LlmClient`] trait. Provider-specific error codes are classified into
//! the [`crate::orchestrator::error::LlmError`] taxonomy here at the
//! boundary; nothing above this module knows about HTTP status codes.

mod openai;
mod stream;

pub use openai::OpenAiClient;
pub use stream::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{Message, ToolSchema};
use super::error::LlmResult;

/// Trait for chat-completion providers
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name, for logging
    fn name(&self) -> &str;

    /// Complete a request (non-streaming)
    async fn chat(&self, request: ChatRequest) -> LlmResult<ChatResponse>;

    /// Complete a request with streaming
    fn stream(&self, request: ChatRequest) -> LlmStream;
}

/// Request for a chat completion
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Messages in the conversation
    pub messages: Vec<Message>,
    /// Tools available for calling; empty disables tool use
    pub tools: Vec<ToolSchema>,
    /// Temperature for sampling
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Request over the given messages with a tool catalog
    pub fn new(messages: Vec<Message>, tools: Vec<ToolSchema>) -> Self {
        Self {
            messages,
            tools,
            ..Default::default()
        }
    }
}

/// Response from a chat completion
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The assistant message, with tool calls when the model requested any
    pub message: Message,
    /// Token usage; providers do not always report it
    pub usage: Option<TokenUsage>,
}

/// Token usage counters
///
/// Accumulated across all LLM calls in a loop. A provider that omits the
/// usage field contributes zero, never an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input: u64,
    /// Completion tokens
    pub output: u64,
}

impl TokenUsage {
    /// Create usage counters
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    /// Total tokens
    pub fn total(&self) -> u64 {
        self.input + self.output
    }

    /// Add another usage sample into this accumulator
    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }
}
