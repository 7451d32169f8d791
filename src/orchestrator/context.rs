//! Context-window management with a three-line-of-defense system
//!
//! Defense 1: single tool-result truncation, applied as results are
//! appended. Defense 2: history trimming before each LLM call. Defense 3:
//! force trim to a safe range after a context-overflow error. All trims
//! preserve the pairing invariant between assistant tool_calls and their
//! tool-result messages.

use std::collections::HashSet;

use super::config::ReactLoopConfig;
use super::domain::{Message, Role};

/// Manages conversation context size
///
/// Token counting uses an approximate rule of 4 characters per token over
/// the message content; precise tokenization is not required.
pub struct ContextManager {
    config: ReactLoopConfig,
}

const CHARS_PER_TOKEN: usize = 4;
const FORCE_TRIM_KEEP: usize = 5;
const TRUNCATION_MARKER: &str = "\n[...truncated]";

impl ContextManager {
    /// Create a manager over the loop configuration
    pub fn new(config: ReactLoopConfig) -> Self {
        Self { config }
    }

    /// Estimate token count from messages
    pub fn estimate_tokens(&self, messages: &[Message]) -> usize {
        let chars: usize = messages.iter().map(|m| m.content.len()).sum();
        chars / CHARS_PER_TOKEN
    }

    /// Character budget for a single tool result
    pub fn tool_result_budget(&self) -> usize {
        let share = (self.config.context_token_limit as f64
            * self.config.max_tool_result_share
            * CHARS_PER_TOKEN as f64) as usize;
        share.min(self.config.max_tool_result_chars)
    }

    /// Defense 1: truncate a single tool result to stay within budget
    ///
    /// Prefers a newline boundary when one falls in the second half of the
    /// cut, and appends a truncation marker.
    pub fn truncate_tool_result(&self, result: &str) -> String {
        let max_chars = self.tool_result_budget();
        if result.len() <= max_chars {
            return result.to_string();
        }

        let mut end = max_chars;
        while end > 0 && !result.is_char_boundary(end) {
            end -= 1;
        }
        let mut cut = &result[..end];
        if let Some(newline_pos) = cut.rfind('\n') {
            if newline_pos > max_chars / 2 {
                cut = &cut[..newline_pos + 1];
            }
        }

        format!("{}{}", cut, TRUNCATION_MARKER)
    }

    /// Defense 2: trim history when estimated tokens exceed the threshold
    ///
    /// Keeps all system messages plus the most recent
    /// `max_history_messages` non-system messages.
    pub fn trim_if_needed(&self, messages: Vec<Message>) -> Vec<Message> {
        let threshold = (self.config.context_token_limit as f64
            * self.config.context_trim_threshold) as usize;
        if self.estimate_tokens(&messages) <= threshold {
            return messages;
        }

        keep_recent(messages, self.config.max_history_messages)
    }

    /// Rewrite every tool message with the defense-1 cap
    ///
    /// Used between overflow-recovery steps.
    pub fn truncate_all_tool_results(&self, messages: Vec<Message>) -> Vec<Message> {
        messages
            .into_iter()
            .map(|mut msg| {
                if msg.role == Role::Tool {
                    msg.content = self.truncate_tool_result(&msg.content);
                }
                msg
            })
            .collect()
    }

    /// Defense 3: aggressively trim to system messages plus the last few
    ///
    /// Also drops a trailing assistant turn whose tool calls have no
    /// results yet, so recovery never resumes mid-turn.
    pub fn force_trim(&self, messages: Vec<Message>) -> Vec<Message> {
        let mut kept = keep_recent(messages, FORCE_TRIM_KEEP);

        if let Some(last) = kept.iter().rposition(|m| m.role == Role::Assistant) {
            let ids: HashSet<String> = kept[last]
                .tool_call_ids()
                .into_iter()
                .map(str::to_string)
                .collect();
            if !ids.is_empty() {
                let satisfied = kept[last + 1..]
                    .iter()
                    .filter_map(|m| m.tool_call_id.as_deref())
                    .collect::<HashSet<_>>();
                if ids.iter().any(|id| !satisfied.contains(id.as_str())) {
                    kept.remove(last);
                    kept = repair_pairing(kept);
                }
            }
        }

        kept
    }
}

/// System messages plus the last `keep` non-system messages, re-paired
fn keep_recent(messages: Vec<Message>, keep: usize) -> Vec<Message> {
    let (system, rest): (Vec<Message>, Vec<Message>) =
        messages.into_iter().partition(|m| m.role == Role::System);

    let tail_start = rest.len().saturating_sub(keep);
    let mut kept = system;
    kept.extend(rest.into_iter().skip(tail_start));

    repair_pairing(kept)
}

/// Drop orphaned tool messages and assistant turns split from their results
///
/// A tool message whose call ID has no retained assistant turn is dropped;
/// an assistant turn with tool calls whose results were all cut is dropped
/// as well. Tool calls and their result siblings are never split.
fn repair_pairing(messages: Vec<Message>) -> Vec<Message> {
    let call_ids: HashSet<String> = messages
        .iter()
        .flat_map(|m| m.tool_call_ids())
        .map(str::to_string)
        .collect();
    let result_ids: HashSet<String> = messages
        .iter()
        .filter_map(|m| m.tool_call_id.clone())
        .collect();

    messages
        .into_iter()
        .filter(|m| {
            if m.role == Role::Tool {
                return m
                    .tool_call_id
                    .as_ref()
                    .is_some_and(|id| call_ids.contains(id));
            }
            if m.role == Role::Assistant && m.has_tool_calls() {
                return m
                    .tool_call_ids()
                    .iter()
                    .all(|id| result_ids.contains(*id));
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::domain::ToolCall;
    use serde_json::json;

    fn manager() -> ContextManager {
        ContextManager::new(ReactLoopConfig::default())
    }

    fn small_manager() -> ContextManager {
        ContextManager::new(ReactLoopConfig {
            context_token_limit: 100,
            max_tool_result_chars: 120,
            max_history_messages: 4,
            ..Default::default()
        })
    }

    fn turn(id: &str, result: &str) -> Vec<Message> {
        vec![
            Message::assistant_with_tools(
                "",
                vec![ToolCall::new(id, "get_weather", json!({"city": "x"}))],
            ),
            Message::tool_result(id, result),
        ]
    }

    #[test]
    fn short_results_pass_through() {
        let m = manager();
        assert_eq!(m.truncate_tool_result("short"), "short");
    }

    #[test]
    fn long_results_are_cut_with_marker() {
        let m = manager();
        let giant = "x".repeat(500_000);
        let cut = m.truncate_tool_result(&giant);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert!(cut.len() <= m.tool_result_budget() + TRUNCATION_MARKER.len());
    }

    #[test]
    fn truncation_prefers_late_newline() {
        let m = small_manager();
        // budget = min(100 * 0.3 * 4, 120) = 120
        let mut text = "a".repeat(100);
        text.push('\n');
        text.push_str(&"b".repeat(100));
        let cut = m.truncate_tool_result(&text);
        assert_eq!(cut, format!("{}\n{}", "a".repeat(100), TRUNCATION_MARKER));
    }

    #[test]
    fn early_newline_is_ignored() {
        let m = small_manager();
        let mut text = "a".repeat(10);
        text.push('\n');
        text.push_str(&"b".repeat(300));
        let cut = m.truncate_tool_result(&text);
        // Newline falls in the first half of the cut, so the cut is flat
        assert_eq!(cut.len(), 120 + TRUNCATION_MARKER.len());
    }

    #[test]
    fn trim_is_noop_under_threshold() {
        let m = manager();
        let messages = vec![Message::system("persona"), Message::user("hi")];
        let trimmed = m.trim_if_needed(messages.clone());
        assert_eq!(trimmed.len(), messages.len());
    }

    #[test]
    fn trim_keeps_system_and_recent_tail() {
        let m = small_manager();
        let mut messages = vec![Message::system("persona")];
        for i in 0..20 {
            messages.push(Message::user(format!("message {} {}", i, "x".repeat(100))));
        }
        let trimmed = m.trim_if_needed(messages);
        assert_eq!(trimmed[0].role, Role::System);
        assert_eq!(trimmed.len(), 1 + 4);
        assert!(trimmed.last().unwrap().content.starts_with("message 19"));
    }

    #[test]
    fn trim_never_splits_tool_pairs() {
        let m = small_manager();
        let mut messages = vec![Message::system("persona"), Message::user("hi".repeat(500))];
        messages.extend(turn("call_1", "old result"));
        messages.extend(turn("call_2", "mid result"));
        messages.push(Message::user("latest"));

        // keep=4 cuts into the call_1 turn, leaving its tool message orphaned
        let trimmed = m.trim_if_needed(messages);
        let orphans: Vec<_> = trimmed
            .iter()
            .filter(|msg| msg.role == Role::Tool)
            .filter(|msg| {
                !trimmed.iter().any(|a| {
                    a.tool_call_ids()
                        .contains(&msg.tool_call_id.as_deref().unwrap())
                })
            })
            .collect();
        assert!(orphans.is_empty());

        // call_2's pair survives intact
        assert!(trimmed.iter().any(|msg| {
            msg.tool_call_id.as_deref() == Some("call_2")
        }));
    }

    #[test]
    fn force_trim_drops_unsatisfied_assistant_turn() {
        let m = manager();
        let mut messages = vec![Message::system("persona"), Message::user("hi")];
        messages.extend(turn("call_1", "done"));
        messages.push(Message::assistant_with_tools(
            "",
            vec![ToolCall::new("call_2", "slow_tool", json!({}))],
        ));

        let trimmed = m.force_trim(messages);
        assert!(!trimmed
            .iter()
            .any(|msg| msg.tool_call_ids().contains(&"call_2")));
        // The satisfied pair is still intact
        assert!(trimmed
            .iter()
            .any(|msg| msg.tool_call_id.as_deref() == Some("call_1")));
    }

    #[test]
    fn truncate_all_rewrites_only_tool_messages() {
        let m = small_manager();
        let user_text = "u".repeat(500);
        let messages = vec![
            Message::user(user_text.clone()),
            Message::tool_result("call_1", "t".repeat(500)),
        ];
        let rewritten = m.truncate_all_tool_results(messages);
        assert_eq!(rewritten[0].content, user_text);
        assert!(rewritten[1].content.ends_with(TRUNCATION_MARKER));
    }
}
