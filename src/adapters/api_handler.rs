//! HTTP handlers for the chat surface
//!
//! `POST /chat` runs a message to completion and returns the structured
//! loop result. `POST /stream` runs the same lifecycle and frames the
//! event stream as SSE (`data: <json>` lines with a terminal
//! `data: [DONE]`). `GET /health` reports liveness.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::orchestrator::{Orchestrator, OrchestratorError};

/// Shared application state for the HTTP handlers
#[derive(Clone)]
pub struct ApiState {
    /// The orchestrator behind the HTTP surface
    pub orchestrator: Arc<Orchestrator>,
}

/// Body of `POST /chat` and `POST /stream`
#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    /// Tenant the message belongs to
    pub tenant_id: String,
    /// The user message text
    pub message: String,
    /// Optional request metadata
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Error payload
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// `POST /chat`
pub async fn chat(
    State(state): State<ApiState>,
    Json(body): Json<ChatRequestBody>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .handle_message(&body.tenant_id, &body.message, body.metadata)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(json!(result))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// `POST /stream`
pub async fn stream(
    State(state): State<ApiState>,
    Json(body): Json<ChatRequestBody>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events =
        state
            .orchestrator
            .clone()
            .stream_message(body.tenant_id, body.message, body.metadata);

    let sse_stream = events
        .map(|event| {
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            Ok(Event::default().data(data))
        })
        .chain(futures::stream::once(async {
            Ok(Event::default().data("[DONE]"))
        }));

    Sse::new(sse_stream)
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn error_response(error: OrchestratorError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &error {
        OrchestratorError::PolicyReject(_) => StatusCode::TOO_MANY_REQUESTS,
        OrchestratorError::AgentNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::Llm(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
}
