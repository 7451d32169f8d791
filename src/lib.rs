//! # Concierge - Conversational Agent Orchestrator
//!
//! Concierge drives a Reason-Act (ReAct) loop over an LLM function-calling
//! interface. A user message arrives; the orchestrator plans, invokes one
//! or more tools (including stateful agents exposed as tools), and
//! produces a natural-language response.
//!
//! ## Features
//!
//! - **ReAct loop**: concurrent tool fan-out with per-call timeouts and
//!   error isolation delegated back to the planner
//! - **Agent-Tools**: stateful agents that collect declared fields across
//!   messages, pause for user input or approval, and resume later
//! - **Agent pool**: per-tenant, TTL-bound, schema-versioned storage for
//!   parked agents, with optional write-through persistence
//! - **Context management**: three-tier trimming with layered overflow
//!   recovery
//! - **Approvals**: structured, batched approval requests with expiry
//! - **Streaming**: typed event stream over SSE
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use concierge::orchestrator::llm::OpenAiClient;
//! use concierge::orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let llm = Arc::new(OpenAiClient::from_env("gpt-4o", None)?);
//!     let orchestrator = Orchestrator::builder(llm).build()?;
//!     orchestrator.start().await?;
//!
//!     let result = orchestrator
//!         .handle_message("tenant-1", "What's the weather in Tokyo?", None)
//!         .await?;
//!     println!("{}", result.response);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod orchestrator;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::adapters::api_handler::{self, ApiState};
use crate::orchestrator::Orchestrator;

/// Creates the Axum application router with all endpoints configured.
pub fn create_app(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/chat", post(api_handler::chat))
        .route("/stream", post(api_handler::stream))
        .route("/health", get(api_handler::health))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}
