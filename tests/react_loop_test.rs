//! End-to-end loop behavior with a scripted planner

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{NeverFinishesTool, ScriptedLlm, Step, WeatherTool};
use concierge::orchestrator::domain::{Role, ToolCall};
use concierge::orchestrator::invoker::ToolRegistry;
use concierge::orchestrator::memory::{InMemoryMemory, MemoryProvider};
use concierge::orchestrator::react::{LoopStatus, ResultStatus};
use concierge::orchestrator::{Orchestrator, ReactLoopConfig};

fn weather_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(WeatherTool));
    tools.register(Arc::new(NeverFinishesTool));
    tools
}

#[tokio::test]
async fn single_plain_tool_round_trip() {
    let llm = ScriptedLlm::new(vec![
        Step::call("call_1", "get_weather", json!({"city": "Tokyo"})),
        Step::text("Tokyo is 18°C and clear."),
    ]);
    let memory = Arc::new(InMemoryMemory::new());
    let orchestrator = Orchestrator::builder(llm.clone())
        .with_tools(weather_tools())
        .with_memory(memory.clone() as Arc<dyn MemoryProvider>)
        .build()
        .unwrap();

    let result = orchestrator
        .handle_message("tenant-1", "What's the weather in Tokyo?", None)
        .await
        .unwrap();

    assert_eq!(result.response, "Tokyo is 18°C and clear.");
    assert_eq!(result.status, LoopStatus::Completed);
    assert_eq!(result.turns, 2);
    assert_eq!(result.tool_call_records.len(), 1);

    let record = &result.tool_call_records[0];
    assert_eq!(record.name, "get_weather");
    assert!(record.success);
    assert_eq!(record.result_status, ResultStatus::Completed);
    assert!(record.result_chars > 0);
    assert!(record.token_attribution.is_some());

    // Usage accumulated across both calls
    assert_eq!(result.token_usage.total(), 220);
}

#[tokio::test]
async fn parallel_fan_out_preserves_call_order() {
    // Tokyo resolves slower than Paris; appended results must still follow
    // the call order, not the completion order
    let llm = ScriptedLlm::new(vec![
        Step::Calls(vec![
            ToolCall::new("call_a", "get_weather", json!({"city": "Tokyo"})),
            ToolCall::new("call_b", "get_weather", json!({"city": "Paris"})),
        ]),
        Step::text("Both cities are clear."),
    ]);
    let memory = Arc::new(InMemoryMemory::new());
    let orchestrator = Orchestrator::builder(llm.clone())
        .with_tools(weather_tools())
        .with_memory(memory.clone() as Arc<dyn MemoryProvider>)
        .build()
        .unwrap();

    let result = orchestrator
        .handle_message("tenant-1", "Weather in Tokyo and Paris?", None)
        .await
        .unwrap();

    assert_eq!(result.turns, 2);
    assert_eq!(result.tool_call_records.len(), 2);
    assert!(result.tool_call_records.iter().all(|r| r.success));

    let history = memory.get_history("tenant-1", "tenant-1", 50).await.unwrap();
    let tool_ids: Vec<String> = history
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.tool_call_id.clone().unwrap())
        .collect();
    assert_eq!(tool_ids, vec!["call_a", "call_b"]);

    // Every tool_call has exactly one result before the next assistant turn
    let assistant = history
        .iter()
        .find(|m| m.has_tool_calls())
        .expect("assistant turn with calls");
    for id in assistant.tool_call_ids() {
        let count = history
            .iter()
            .filter(|m| m.tool_call_id.as_deref() == Some(id))
            .count();
        assert_eq!(count, 1);
    }
}

#[tokio::test]
async fn unknown_tool_becomes_error_message_for_planner() {
    let llm = ScriptedLlm::new(vec![
        Step::call("call_1", "send_fax", json!({"to": "555"})),
        Step::text("I don't have a fax tool, sorry."),
    ]);
    let memory = Arc::new(InMemoryMemory::new());
    let orchestrator = Orchestrator::builder(llm.clone())
        .with_tools(weather_tools())
        .with_memory(memory.clone() as Arc<dyn MemoryProvider>)
        .build()
        .unwrap();

    let result = orchestrator
        .handle_message("tenant-1", "Fax this to 555", None)
        .await
        .unwrap();

    // The loop survives; the failure is delegated to the planner
    assert_eq!(result.turns, 2);
    let record = &result.tool_call_records[0];
    assert!(!record.success);
    assert_eq!(record.result_status, ResultStatus::Error);

    let history = memory.get_history("tenant-1", "tenant-1", 50).await.unwrap();
    let tool_message = history
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool message");
    assert!(tool_message.is_error);
    assert_eq!(tool_message.content, "Tool send_fax is not registered");
}

#[tokio::test]
async fn malformed_arguments_become_error_message() {
    let llm = ScriptedLlm::new(vec![
        Step::call("call_1", "get_weather", json!(["Tokyo"])),
        Step::text("Let me try that differently."),
    ]);
    let orchestrator = Orchestrator::builder(llm)
        .with_tools(weather_tools())
        .build()
        .unwrap();

    let result = orchestrator
        .handle_message("tenant-1", "Weather?", None)
        .await
        .unwrap();
    assert_eq!(result.turns, 2);
    assert!(!result.tool_call_records[0].success);
}

#[tokio::test]
async fn zero_max_turns_returns_first_response_without_tools() {
    let llm = ScriptedLlm::new(vec![Step::text("Direct answer.")]);
    let orchestrator = Orchestrator::builder(llm.clone())
        .with_tools(weather_tools())
        .with_config(ReactLoopConfig {
            max_turns: 0,
            ..Default::default()
        })
        .build()
        .unwrap();

    let result = orchestrator
        .handle_message("tenant-1", "Hello", None)
        .await
        .unwrap();

    assert_eq!(result.response, "Direct answer.");
    assert_eq!(result.turns, 1);
    assert!(result.tool_call_records.is_empty());
    assert!(llm.last_request().tools.is_empty());
}

#[tokio::test]
async fn empty_final_content_is_still_final() {
    let llm = ScriptedLlm::new(vec![Step::text("")]);
    let orchestrator = Orchestrator::builder(llm)
        .with_tools(weather_tools())
        .build()
        .unwrap();

    let result = orchestrator
        .handle_message("tenant-1", "…", None)
        .await
        .unwrap();
    assert_eq!(result.response, "");
    assert_eq!(result.turns, 1);
}

#[tokio::test(start_paused = true)]
async fn timing_out_tool_runs_into_forced_summary() {
    // The planner keeps calling a tool that always times out; the loop
    // caps the turns and forces a final text answer with no tools
    let llm = ScriptedLlm::new(vec![
        Step::call("call_1", "fetch_archive", json!({})),
        Step::call("call_2", "fetch_archive", json!({})),
        Step::text("I could not fetch the archive in time."),
    ]);
    let orchestrator = Orchestrator::builder(llm.clone())
        .with_tools(weather_tools())
        .with_config(ReactLoopConfig {
            max_turns: 2,
            tool_execution_timeout: 1,
            ..Default::default()
        })
        .build()
        .unwrap();

    let result = orchestrator
        .handle_message("tenant-1", "Get the archive", None)
        .await
        .unwrap();

    assert_eq!(result.response, "I could not fetch the archive in time.");
    assert_eq!(result.turns, 3); // max_turns + forced summary
    assert_eq!(result.tool_call_records.len(), 2);
    assert!(result
        .tool_call_records
        .iter()
        .all(|r| !r.success && r.result_status == ResultStatus::Error));

    // The final call carries no tools and the terminal instruction
    let last = llm.last_request();
    assert!(last.tools.is_empty());
    assert!(last
        .messages
        .iter()
        .any(|m| m.content.contains("Provide a final answer")));
}

#[tokio::test]
async fn rate_limited_tenant_gets_rejection_without_llm_call() {
    let llm = ScriptedLlm::new(vec![Step::text("hello")]);
    let orchestrator = Orchestrator::builder(llm.clone())
        .with_rate_limit(concierge::orchestrator::RateLimitSettings {
            requests_per_second: 1,
            burst_size: 1,
        })
        .build()
        .unwrap();

    let first = orchestrator
        .handle_message("tenant-1", "hi", None)
        .await
        .unwrap();
    assert_eq!(first.response, "hello");

    let second = orchestrator
        .handle_message("tenant-1", "hi again", None)
        .await
        .unwrap();
    assert!(second.response.contains("too quickly"));
    assert_eq!(second.turns, 0);
    // Only the first message reached the LLM
    assert_eq!(llm.request_count(), 1);
}
