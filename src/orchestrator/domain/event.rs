//! Streaming event types
//!
//! `stream_message` emits a sequence of these events. The transport layer
//! frames them as SSE; the types themselves are transport-agnostic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::now_millis;

/// Types of events emitted while streaming a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageStart,
    MessageChunk,
    MessageEnd,
    StateChange,
    FieldCollected,
    FieldValidated,
    ToolCallStart,
    ToolCallEnd,
    ToolResult,
    Error,
    Done,
}

/// A single streamed event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Event type
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Event-specific payload
    pub data: Value,
    /// When the event was produced (Unix epoch milliseconds)
    pub timestamp: u64,
}

impl AgentEvent {
    /// Create an event with the given payload
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            event_type,
            data,
            timestamp: now_millis(),
        }
    }

    /// Message chunk event
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::new(
            EventType::MessageChunk,
            serde_json::json!({ "chunk": text.into() }),
        )
    }

    /// State change event
    pub fn state_change(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self::new(
            EventType::StateChange,
            serde_json::json!({ "old_status": old.into(), "new_status": new.into() }),
        )
    }

    /// Error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            EventType::Error,
            serde_json::json!({ "error": message.into() }),
        )
    }

    /// Terminal event
    pub fn done() -> Self {
        Self::new(EventType::Done, Value::Null)
    }
}
