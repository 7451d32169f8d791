//! Memory provider contract
//!
//! Conversation history and long-term fact recall live behind this trait.
//! The in-memory implementation backs tests and single-process runs; a
//! vector-store-backed provider plugs in the same way.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::domain::Message;
use super::error::OrchestratorResult;

/// A recalled long-term fact
#[derive(Debug, Clone)]
pub struct Fact {
    /// The remembered statement
    pub content: String,
    /// Relevance score, higher is better
    pub score: f64,
}

/// Conversation history and long-term memory
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Most recent history for (tenant, session), oldest first
    async fn get_history(
        &self,
        tenant_id: &str,
        session_id: &str,
        limit: usize,
    ) -> OrchestratorResult<Vec<Message>>;

    /// Replace stored history for (tenant, session)
    async fn save_history(
        &self,
        tenant_id: &str,
        session_id: &str,
        messages: Vec<Message>,
    ) -> OrchestratorResult<()>;

    /// Search long-term facts relevant to a query
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        limit: usize,
    ) -> OrchestratorResult<Vec<Fact>>;

    /// Hand messages to long-term extraction
    async fn add(&self, tenant_id: &str, messages: &[Message]) -> OrchestratorResult<()>;
}

/// In-memory provider with naive keyword fact search
#[derive(Default)]
pub struct InMemoryMemory {
    histories: RwLock<HashMap<(String, String), Vec<Message>>>,
    facts: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryMemory {
    /// Empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fact directly, bypassing extraction
    pub async fn remember(&self, tenant_id: &str, fact: impl Into<String>) {
        self.facts
            .write()
            .await
            .entry(tenant_id.to_string())
            .or_default()
            .push(fact.into());
    }
}

#[async_trait]
impl MemoryProvider for InMemoryMemory {
    async fn get_history(
        &self,
        tenant_id: &str,
        session_id: &str,
        limit: usize,
    ) -> OrchestratorResult<Vec<Message>> {
        let histories = self.histories.read().await;
        let messages = histories
            .get(&(tenant_id.to_string(), session_id.to_string()))
            .cloned()
            .unwrap_or_default();
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn save_history(
        &self,
        tenant_id: &str,
        session_id: &str,
        messages: Vec<Message>,
    ) -> OrchestratorResult<()> {
        self.histories
            .write()
            .await
            .insert((tenant_id.to_string(), session_id.to_string()), messages);
        Ok(())
    }

    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        limit: usize,
    ) -> OrchestratorResult<Vec<Fact>> {
        let facts = self.facts.read().await;
        let Some(stored) = facts.get(tenant_id) else {
            return Ok(Vec::new());
        };

        let words: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let mut scored: Vec<Fact> = stored
            .iter()
            .filter_map(|fact| {
                let lower = fact.to_lowercase();
                let hits = words.iter().filter(|w| lower.contains(*w)).count();
                (hits > 0).then(|| Fact {
                    content: fact.clone(),
                    score: hits as f64 / words.len().max(1) as f64,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn add(&self, tenant_id: &str, messages: &[Message]) -> OrchestratorResult<()> {
        // No inference here; user statements are stored verbatim
        let mut facts = self.facts.write().await;
        let stored = facts.entry(tenant_id.to_string()).or_default();
        for message in messages {
            if message.role == super::domain::Role::User && !message.content.is_empty() {
                stored.push(message.content.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_round_trip_with_limit() {
        let memory = InMemoryMemory::new();
        let messages: Vec<Message> = (0..10)
            .map(|i| Message::user(format!("message {}", i)))
            .collect();
        memory.save_history("t1", "s1", messages).await.unwrap();

        let recent = memory.get_history("t1", "s1", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "message 7");

        assert!(memory.get_history("t2", "s1", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fact_search_ranks_by_overlap() {
        let memory = InMemoryMemory::new();
        memory.remember("t1", "User prefers window seats on flights").await;
        memory.remember("t1", "User's dog is named Biscuit").await;

        let facts = memory.search("t1", "book a flight seat", 5).await.unwrap();
        assert_eq!(facts.len(), 1);
        assert!(facts[0].content.contains("window seats"));
    }
}
