//! Conversational agent orchestration
//!
//! The core of the crate: a ReAct loop over an LLM function-calling
//! interface, with stateful agents exposed as tools, a schema-versioned
//! per-tenant agent pool, three-tier context management, and structured
//! approval flows.
//!
//! ## Architecture
//!
//! - `domain/` - Core types (Message, ToolCall, AgentStatus, AgentEvent)
//! - `llm/` - LLM provider contract, streaming, OpenAI-compatible client
//! - `registry` - Agent declarations and tool-schema synthesis
//! - `agent` - Stateful agent runtime (tagged-state machine)
//! - `pool` / `persistence` - Parked agents with TTL and schema guard
//! - `context` - Token accounting and three-tier trimming
//! - `invoker` - Tool dispatch under per-call timeouts
//! - `approval` - Approval requests, batching, and resolution
//! - `react` - The planning loop
//! - `core` - Per-message lifecycle (`handle_message` / `stream_message`)
//! - `memory` / `credentials` / `triggers` - Collaborator contracts

pub mod agent;
pub mod approval;
pub mod config;
pub mod context;
pub mod core;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod invoker;
pub mod llm;
pub mod memory;
pub mod persistence;
pub mod pool;
pub mod react;
pub mod registry;
pub mod triggers;

pub use config::{PoolConfig, ReactLoopConfig};
pub use core::{Orchestrator, OrchestratorBuilder, RateLimitSettings};
pub use domain::*;
pub use error::{LlmError, LlmResult, OrchestratorError, OrchestratorResult};
pub use react::{LoopStatus, ReactLoopResult, ResultStatus, ToolCallRecord};
