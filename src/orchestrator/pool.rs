//! Agent pool with per-tenant isolation
//!
//! Stores non-terminal agent instances keyed by (tenant, agent_id).
//! Entries carry a TTL and the schema version recorded at insertion; a
//! version that no longer matches the registry means the agent type
//! changed underneath the pooled state, so the entry is discarded rather
//! than restored into a shape the agent no longer understands.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use super::agent::Agent;
use super::config::PoolConfig;
use super::domain::{now_millis, AgentStatus};
use super::error::OrchestratorResult;
use super::persistence::PoolStore;
use super::registry::AgentRegistry;

/// Shared handle to a pooled agent; writes are serialized per entry
pub type AgentHandle = Arc<Mutex<Box<dyn Agent>>>;

/// Persisted snapshot of a pooled agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPoolEntry {
    /// Unique agent instance ID
    pub agent_id: String,
    /// Agent type (registry key)
    pub agent_type: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Status at snapshot time (always non-terminal in the pool)
    pub status: AgentStatus,
    /// Schema version recorded at insertion
    pub schema_version: u32,
    /// Fields collected so far
    pub collected_fields: Map<String, Value>,
    /// Field currently being asked of the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_field: Option<String>,
    /// The ReAct tool call that parked this agent, for re-pairing on resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Triggered-task identifier, when the message came from the trigger engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Creation time (Unix epoch milliseconds)
    pub created_at: u64,
    /// Expiry deadline (Unix epoch milliseconds)
    pub ttl_deadline: u64,
    /// Approval expiry deadline, when waiting for approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_deadline: Option<u64>,
}

struct PooledAgent {
    entry: AgentPoolEntry,
    agent: AgentHandle,
}

#[derive(Default)]
struct PoolInner {
    /// Per-tenant entries in insertion order
    tenants: HashMap<String, Vec<PooledAgent>>,
}

/// Pool of parked agents awaiting user input or approval
pub struct AgentPool {
    config: PoolConfig,
    registry: Arc<AgentRegistry>,
    store: Option<Arc<dyn PoolStore>>,
    inner: RwLock<PoolInner>,
}

impl AgentPool {
    /// Create a pool; persistence is enabled when a store is supplied
    pub fn new(
        config: PoolConfig,
        registry: Arc<AgentRegistry>,
        store: Option<Arc<dyn PoolStore>>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            inner: RwLock::new(PoolInner::default()),
        }
    }

    fn ttl_deadline(&self) -> u64 {
        now_millis() + self.config.ttl_seconds * 1_000
    }

    /// Park an agent after it entered a waiting state
    ///
    /// Idempotent on agent_id: re-parking updates the entry in place and
    /// resets its TTL. Overflow beyond the per-tenant cap evicts the
    /// oldest entry.
    pub async fn park(
        &self,
        agent: Box<dyn Agent>,
        tool_call_id: Option<String>,
        approval_deadline: Option<u64>,
        task_id: Option<String>,
    ) -> OrchestratorResult<AgentPoolEntry> {
        let entry = AgentPoolEntry {
            agent_id: agent.agent_id().to_string(),
            agent_type: agent.agent_type().to_string(),
            tenant_id: agent.tenant_id().to_string(),
            status: agent.status(),
            schema_version: self
                .registry
                .schema_version(agent.agent_type())
                .unwrap_or_default(),
            collected_fields: agent.collected_fields(),
            pending_field: agent.pending_field(),
            tool_call_id,
            task_id,
            created_at: now_millis(),
            ttl_deadline: self.ttl_deadline(),
            approval_deadline,
        };

        self.insert(entry.clone(), Arc::new(Mutex::new(agent))).await?;
        Ok(entry)
    }

    async fn insert(&self, entry: AgentPoolEntry, agent: AgentHandle) -> OrchestratorResult<()> {
        let mut evicted: Option<AgentPoolEntry> = None;
        {
            let mut inner = self.inner.write().await;
            let agents = inner.tenants.entry(entry.tenant_id.clone()).or_default();

            if let Some(existing) = agents.iter_mut().find(|p| p.entry.agent_id == entry.agent_id)
            {
                existing.entry = entry.clone();
                existing.agent = agent;
            } else {
                agents.push(PooledAgent {
                    entry: entry.clone(),
                    agent,
                });
                if agents.len() > self.config.max_agents_per_tenant {
                    evicted = Some(agents.remove(0).entry);
                }
            }
        }

        if let Some(store) = &self.store {
            store.save(&entry).await?;
            if let Some(old) = &evicted {
                store.remove(&old.tenant_id, &old.agent_id).await?;
            }
        }
        if let Some(old) = evicted {
            tracing::info!(tenant = %old.tenant_id, agent = %old.agent_id, "evicted oldest pooled agent");
        }
        Ok(())
    }

    /// Whether an entry is live right now
    fn is_live(&self, entry: &AgentPoolEntry, now: u64) -> bool {
        if entry.ttl_deadline <= now {
            return false;
        }
        match self.registry.schema_version(&entry.agent_type) {
            Some(current) => current == entry.schema_version,
            None => false,
        }
    }

    /// Get an agent by ID
    ///
    /// Expired or schema-stale entries are removed lazily and treated as
    /// absent.
    pub async fn get(&self, tenant_id: &str, agent_id: &str) -> Option<AgentHandle> {
        self.collect_dead(tenant_id).await;
        let inner = self.inner.read().await;
        inner
            .tenants
            .get(tenant_id)?
            .iter()
            .find(|p| p.entry.agent_id == agent_id)
            .map(|p| p.agent.clone())
    }

    /// Oldest waiting agent for a tenant, if any
    pub async fn find_pending(&self, tenant_id: &str) -> Option<(AgentPoolEntry, AgentHandle)> {
        self.collect_dead(tenant_id).await;
        let inner = self.inner.read().await;
        inner
            .tenants
            .get(tenant_id)?
            .iter()
            .find(|p| p.entry.status.is_waiting())
            .map(|p| (p.entry.clone(), p.agent.clone()))
    }

    /// Entries currently waiting for approval
    pub async fn waiting_approvals(&self, tenant_id: &str) -> Vec<AgentPoolEntry> {
        self.collect_dead(tenant_id).await;
        let inner = self.inner.read().await;
        inner
            .tenants
            .get(tenant_id)
            .map(|agents| {
                agents
                    .iter()
                    .filter(|p| p.entry.status == AgentStatus::WaitingForApproval)
                    .map(|p| p.entry.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All live entries for a tenant, in insertion order
    pub async fn list(&self, tenant_id: &str) -> Vec<AgentPoolEntry> {
        self.collect_dead(tenant_id).await;
        let inner = self.inner.read().await;
        inner
            .tenants
            .get(tenant_id)
            .map(|agents| agents.iter().map(|p| p.entry.clone()).collect())
            .unwrap_or_default()
    }

    /// Re-snapshot a pooled agent after it was driven forward
    ///
    /// Terminal agents leave the pool; waiting agents get a fresh TTL.
    /// `approval_deadline` applies when the agent is now waiting for
    /// approval and the entry has none yet.
    pub async fn refresh(
        &self,
        tenant_id: &str,
        agent_id: &str,
        approval_deadline: Option<u64>,
    ) -> OrchestratorResult<()> {
        let handle = {
            let inner = self.inner.read().await;
            inner
                .tenants
                .get(tenant_id)
                .and_then(|agents| agents.iter().find(|p| p.entry.agent_id == agent_id))
                .map(|p| p.agent.clone())
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        let (status, collected, pending) = {
            let agent = handle.lock().await;
            (agent.status(), agent.collected_fields(), agent.pending_field())
        };

        if status.is_terminal() {
            return self.remove(tenant_id, agent_id).await;
        }

        let updated = {
            let mut inner = self.inner.write().await;
            let Some(agents) = inner.tenants.get_mut(tenant_id) else {
                return Ok(());
            };
            let Some(pooled) = agents.iter_mut().find(|p| p.entry.agent_id == agent_id) else {
                return Ok(());
            };
            pooled.entry.status = status;
            pooled.entry.collected_fields = collected;
            pooled.entry.pending_field = pending;
            pooled.entry.ttl_deadline = self.ttl_deadline();
            if status == AgentStatus::WaitingForApproval {
                if pooled.entry.approval_deadline.is_none() {
                    pooled.entry.approval_deadline = approval_deadline;
                }
            } else {
                pooled.entry.approval_deadline = None;
            }
            pooled.entry.clone()
        };

        if let Some(store) = &self.store {
            store.save(&updated).await?;
        }
        Ok(())
    }

    /// Remove an entry; a no-op if absent
    pub async fn remove(&self, tenant_id: &str, agent_id: &str) -> OrchestratorResult<()> {
        let removed = {
            let mut inner = self.inner.write().await;
            match inner.tenants.get_mut(tenant_id) {
                Some(agents) => {
                    let before = agents.len();
                    agents.retain(|p| p.entry.agent_id != agent_id);
                    if agents.is_empty() {
                        inner.tenants.remove(tenant_id);
                    }
                    before
                        != inner
                            .tenants
                            .get(tenant_id)
                            .map(|a| a.len())
                            .unwrap_or_default()
                }
                None => false,
            }
        };

        if removed {
            if let Some(store) = &self.store {
                store.remove(tenant_id, agent_id).await?;
            }
        }
        Ok(())
    }

    /// Drop expired and schema-stale entries for one tenant
    async fn collect_dead(&self, tenant_id: &str) {
        let now = now_millis();
        let dead: Vec<AgentPoolEntry> = {
            let inner = self.inner.read().await;
            match inner.tenants.get(tenant_id) {
                Some(agents) => agents
                    .iter()
                    .filter(|p| !self.is_live(&p.entry, now))
                    .map(|p| p.entry.clone())
                    .collect(),
                None => return,
            }
        };
        for entry in dead {
            tracing::info!(tenant = %entry.tenant_id, agent = %entry.agent_id, "dropping stale pool entry");
            let _ = self.remove(tenant_id, &entry.agent_id).await;
        }
    }

    /// Eager sweep across all tenants
    ///
    /// Removes TTL-expired entries and returns entries whose approval
    /// deadline lapsed, so the caller can mark associated triggered tasks
    /// expired.
    pub async fn sweep(&self) -> Vec<AgentPoolEntry> {
        let now = now_millis();
        let (dead, lapsed): (Vec<AgentPoolEntry>, Vec<AgentPoolEntry>) = {
            let inner = self.inner.read().await;
            let mut dead = Vec::new();
            let mut lapsed = Vec::new();
            for agents in inner.tenants.values() {
                for p in agents {
                    if !self.is_live(&p.entry, now) {
                        dead.push(p.entry.clone());
                    } else if p.entry.approval_deadline.is_some_and(|d| d <= now) {
                        lapsed.push(p.entry.clone());
                    }
                }
            }
            (dead, lapsed)
        };

        for entry in dead.iter().chain(lapsed.iter()) {
            let _ = self.remove(&entry.tenant_id, &entry.agent_id).await;
        }
        if !lapsed.is_empty() {
            tracing::info!(count = lapsed.len(), "approval requests expired");
        }
        lapsed
    }

    /// Spawn the background sweep task
    ///
    /// Period is clamped to TTL / 4 by the config.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        on_lapsed: impl Fn(Vec<AgentPoolEntry>) + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        let period = self.config.sweep_period();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let lapsed = pool.sweep().await;
                if !lapsed.is_empty() {
                    on_lapsed(lapsed);
                }
            }
        })
    }

    /// Restore persisted entries at startup
    ///
    /// Entries whose schema version no longer matches the registry are
    /// discarded with an audit log line; restore itself never fails on a
    /// stale entry.
    pub async fn restore(&self) -> OrchestratorResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let now = now_millis();
        let mut restored = 0;
        for entry in store.load_all().await? {
            if entry.ttl_deadline <= now {
                let _ = store.remove(&entry.tenant_id, &entry.agent_id).await;
                continue;
            }
            let current = self.registry.schema_version(&entry.agent_type);
            if current != Some(entry.schema_version) {
                tracing::warn!(
                    agent = %entry.agent_id,
                    agent_type = %entry.agent_type,
                    pooled = entry.schema_version,
                    current = ?current,
                    "discarding pool entry with stale schema version"
                );
                let _ = store.remove(&entry.tenant_id, &entry.agent_id).await;
                continue;
            }

            let Some(mut agent) = self.registry.instantiate(&entry.agent_type, &entry.tenant_id)
            else {
                continue;
            };
            agent.restore(
                entry.status,
                entry.collected_fields.clone(),
                entry.pending_field.clone(),
            );

            let mut inner = self.inner.write().await;
            inner
                .tenants
                .entry(entry.tenant_id.clone())
                .or_default()
                .push(PooledAgent {
                    entry,
                    agent: Arc::new(Mutex::new(agent)),
                });
            restored += 1;
        }

        tracing::info!(count = restored, "restored pooled agents");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::agent::SyncAction;
    use crate::orchestrator::registry::{AgentSpec, InputField};

    fn registry() -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        registry.register(
            AgentSpec::new("send_email", "Send an email")
                .with_field(InputField::new("recipient", "Who should I send to?")),
            Arc::new(SyncAction(|_: &Map<String, Value>| Ok("sent".into()))),
        );
        Arc::new(registry)
    }

    fn waiting_agent(registry: &AgentRegistry, tenant: &str) -> Box<dyn Agent> {
        let mut agent = registry.instantiate("send_email", tenant).unwrap();
        agent.restore(AgentStatus::WaitingForInput, Map::new(), Some("recipient".into()));
        agent
    }

    #[tokio::test]
    async fn park_and_find_pending() {
        let registry = registry();
        let pool = AgentPool::new(PoolConfig::default(), registry.clone(), None);

        let entry = pool
            .park(waiting_agent(&registry, "t1"), Some("call_1".into()), None, None)
            .await
            .unwrap();
        assert_eq!(entry.status, AgentStatus::WaitingForInput);

        let (found, _) = pool.find_pending("t1").await.unwrap();
        assert_eq!(found.agent_id, entry.agent_id);
        assert_eq!(found.tool_call_id.as_deref(), Some("call_1"));

        // Other tenants see nothing
        assert!(pool.find_pending("t2").await.is_none());
    }

    #[tokio::test]
    async fn overflow_evicts_oldest() {
        let registry = registry();
        let pool = AgentPool::new(
            PoolConfig {
                max_agents_per_tenant: 2,
                ..Default::default()
            },
            registry.clone(),
            None,
        );

        let first = pool
            .park(waiting_agent(&registry, "t1"), None, None, None)
            .await
            .unwrap();
        pool.park(waiting_agent(&registry, "t1"), None, None, None)
            .await
            .unwrap();
        pool.park(waiting_agent(&registry, "t1"), None, None, None)
            .await
            .unwrap();

        let listed = pool.list("t1").await;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|e| e.agent_id != first.agent_id));
    }

    #[tokio::test]
    async fn refresh_removes_terminal_agents() {
        let registry = registry();
        let pool = AgentPool::new(PoolConfig::default(), registry.clone(), None);

        let entry = pool
            .park(waiting_agent(&registry, "t1"), None, None, None)
            .await
            .unwrap();
        let handle = pool.get("t1", &entry.agent_id).await.unwrap();

        // Answering the last missing field completes the agent
        {
            let mut agent = handle.lock().await;
            let ctx = crate::orchestrator::invoker::ToolExecutionContext::new("t1");
            let reply = agent.reply("alice@x.com", &ctx).await;
            assert_eq!(reply.status, AgentStatus::Completed);
        }

        pool.refresh("t1", &entry.agent_id, None).await.unwrap();
        assert!(pool.get("t1", &entry.agent_id).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_absent() {
        let registry = registry();
        let pool = AgentPool::new(
            PoolConfig {
                ttl_seconds: 0,
                ..Default::default()
            },
            registry.clone(),
            None,
        );
        let entry = pool
            .park(waiting_agent(&registry, "t1"), None, None, None)
            .await
            .unwrap();

        assert!(pool.get("t1", &entry.agent_id).await.is_none());
        assert!(pool.find_pending("t1").await.is_none());
    }

    #[tokio::test]
    async fn sweep_reports_lapsed_approvals() {
        let registry = registry();
        let pool = AgentPool::new(PoolConfig::default(), registry.clone(), None);

        let mut agent = registry.instantiate("send_email", "t1").unwrap();
        agent.restore(AgentStatus::WaitingForApproval, Map::new(), None);
        let entry = pool
            .park(agent, Some("call_9".into()), Some(now_millis() - 1), None)
            .await
            .unwrap();

        let lapsed = pool.sweep().await;
        assert_eq!(lapsed.len(), 1);
        assert_eq!(lapsed[0].agent_id, entry.agent_id);
        assert!(pool.find_pending("t1").await.is_none());
    }
}
