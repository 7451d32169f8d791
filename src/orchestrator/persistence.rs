//! Write-through persistence for the agent pool
//!
//! Persistence is optional; the pool works purely in memory when no store
//! is supplied. The file store keeps one JSON document per pooled agent so
//! entries survive process restarts.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

use super::error::{OrchestratorError, OrchestratorResult};
use super::pool::AgentPoolEntry;

/// Storage backend for pool entries
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Persist an entry (insert or overwrite)
    async fn save(&self, entry: &AgentPoolEntry) -> OrchestratorResult<()>;

    /// Remove an entry; absent entries are not an error
    async fn remove(&self, tenant_id: &str, agent_id: &str) -> OrchestratorResult<()>;

    /// Load every persisted entry, across all tenants
    async fn load_all(&self) -> OrchestratorResult<Vec<AgentPoolEntry>>;
}

/// File-based pool store
pub struct FilePoolStore {
    base_path: PathBuf,
}

impl FilePoolStore {
    /// Create a store rooted at the given directory
    pub fn new(base_path: impl Into<PathBuf>) -> OrchestratorResult<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)
            .map_err(|e| OrchestratorError::Pool(format!("Failed to create directory: {}", e)))?;
        Ok(Self { base_path })
    }

    fn entry_path(&self, tenant_id: &str, agent_id: &str) -> PathBuf {
        self.base_path
            .join(format!("{}__{}.json", sanitize(tenant_id), sanitize(agent_id)))
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl PoolStore for FilePoolStore {
    async fn save(&self, entry: &AgentPoolEntry) -> OrchestratorResult<()> {
        let path = self.entry_path(&entry.tenant_id, &entry.agent_id);
        let content = serde_json::to_string_pretty(entry)?;
        fs::write(&path, content)
            .await
            .map_err(|e| OrchestratorError::Pool(format!("Failed to write entry: {}", e)))?;
        Ok(())
    }

    async fn remove(&self, tenant_id: &str, agent_id: &str) -> OrchestratorResult<()> {
        let path = self.entry_path(tenant_id, agent_id);
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| OrchestratorError::Pool(format!("Failed to remove entry: {}", e)))?;
        }
        Ok(())
    }

    async fn load_all(&self) -> OrchestratorResult<Vec<AgentPoolEntry>> {
        let mut dir = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| OrchestratorError::Pool(format!("Failed to read directory: {}", e)))?;

        let mut entries = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| OrchestratorError::Pool(format!("Failed to read directory: {}", e)))?
        {
            let path = item.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<AgentPoolEntry>(&content) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable pool entry");
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable pool entry");
                }
            }
        }

        // Oldest first, so restore preserves insertion order
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::domain::AgentStatus;
    use serde_json::json;

    fn entry(tenant: &str, id: &str) -> AgentPoolEntry {
        let mut collected = serde_json::Map::new();
        collected.insert("recipient".into(), json!("alice@x.com"));
        AgentPoolEntry {
            agent_id: id.to_string(),
            agent_type: "send_email".to_string(),
            tenant_id: tenant.to_string(),
            status: AgentStatus::WaitingForInput,
            schema_version: 0xDEAD_BEEF,
            collected_fields: collected,
            pending_field: Some("subject".to_string()),
            tool_call_id: Some("call_1".to_string()),
            task_id: None,
            created_at: 1_700_000_000_000,
            ttl_deadline: 1_700_000_086_400,
            approval_deadline: None,
        }
    }

    #[tokio::test]
    async fn save_load_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePoolStore::new(dir.path()).unwrap();

        let original = entry("tenant-1", "send_email_ab12cd34");
        store.save(&original).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let restored = &loaded[0];
        assert_eq!(restored.schema_version, original.schema_version);
        assert_eq!(restored.collected_fields, original.collected_fields);
        assert_eq!(restored.status, original.status);
        assert_eq!(restored.ttl_deadline, original.ttl_deadline);
        assert_eq!(restored.tool_call_id, original.tool_call_id);

        store.remove("tenant-1", "send_email_ab12cd34").await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());

        // Removing again is a no-op
        store.remove("tenant-1", "send_email_ab12cd34").await.unwrap();
    }

    #[tokio::test]
    async fn load_all_sorts_by_creation() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePoolStore::new(dir.path()).unwrap();

        let mut newer = entry("t", "agent_b");
        newer.created_at = 2_000;
        let mut older = entry("t", "agent_a");
        older.created_at = 1_000;

        store.save(&newer).await.unwrap();
        store.save(&older).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded[0].agent_id, "agent_a");
        assert_eq!(loaded[1].agent_id, "agent_b");
    }
}
