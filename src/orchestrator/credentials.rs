//! Credential store contract
//!
//! Credentials are an opaque key-value bag per (tenant, service, account).
//! The store neither interprets nor refreshes them; tools receive a handle
//! through the execution context and do their own plumbing.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::error::OrchestratorResult;

/// Opaque credential bag
pub type Credentials = HashMap<String, String>;

/// Default account name when none is given
pub const DEFAULT_ACCOUNT: &str = "primary";

/// Stored credential record
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    /// Service the credentials belong to
    pub service: String,
    /// Account within the service
    pub account: String,
}

/// Storage for per-tenant service credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Save credentials for (tenant, service, account), overwriting any existing
    async fn save(
        &self,
        tenant_id: &str,
        service: &str,
        credentials: Credentials,
        account: &str,
    ) -> OrchestratorResult<()>;

    /// Fetch credentials; `None` when absent
    async fn get(
        &self,
        tenant_id: &str,
        service: &str,
        account: &str,
    ) -> OrchestratorResult<Option<Credentials>>;

    /// List stored records for a tenant, optionally filtered by service
    async fn list(
        &self,
        tenant_id: &str,
        service: Option<&str>,
    ) -> OrchestratorResult<Vec<CredentialRecord>>;

    /// Delete credentials; absent entries are not an error
    async fn delete(&self, tenant_id: &str, service: &str, account: &str)
        -> OrchestratorResult<()>;
}

/// In-memory credential store
#[derive(Default)]
pub struct InMemoryCredentialStore {
    // (tenant, service, account) -> bag
    records: RwLock<HashMap<(String, String, String), Credentials>>,
}

impl InMemoryCredentialStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn save(
        &self,
        tenant_id: &str,
        service: &str,
        credentials: Credentials,
        account: &str,
    ) -> OrchestratorResult<()> {
        self.records.write().await.insert(
            (tenant_id.to_string(), service.to_string(), account.to_string()),
            credentials,
        );
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &str,
        service: &str,
        account: &str,
    ) -> OrchestratorResult<Option<Credentials>> {
        Ok(self
            .records
            .read()
            .await
            .get(&(
                tenant_id.to_string(),
                service.to_string(),
                account.to_string(),
            ))
            .cloned())
    }

    async fn list(
        &self,
        tenant_id: &str,
        service: Option<&str>,
    ) -> OrchestratorResult<Vec<CredentialRecord>> {
        let records = self.records.read().await;
        let mut out: Vec<CredentialRecord> = records
            .keys()
            .filter(|(t, s, _)| t == tenant_id && service.is_none_or(|svc| svc == s))
            .map(|(_, s, a)| CredentialRecord {
                service: s.clone(),
                account: a.clone(),
            })
            .collect();
        out.sort_by(|a, b| (&a.service, &a.account).cmp(&(&b.service, &b.account)));
        Ok(out)
    }

    async fn delete(
        &self,
        tenant_id: &str,
        service: &str,
        account: &str,
    ) -> OrchestratorResult<()> {
        self.records.write().await.remove(&(
            tenant_id.to_string(),
            service.to_string(),
            account.to_string(),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_get_list_delete() {
        let store = InMemoryCredentialStore::new();
        let mut creds = Credentials::new();
        creds.insert("token".into(), "abc123".into());

        store
            .save("t1", "gmail", creds.clone(), DEFAULT_ACCOUNT)
            .await
            .unwrap();
        store
            .save("t1", "notion", Credentials::new(), "work")
            .await
            .unwrap();

        let got = store.get("t1", "gmail", DEFAULT_ACCOUNT).await.unwrap();
        assert_eq!(got.unwrap()["token"], "abc123");
        assert!(store.get("t2", "gmail", DEFAULT_ACCOUNT).await.unwrap().is_none());

        let all = store.list("t1", None).await.unwrap();
        assert_eq!(all.len(), 2);
        let filtered = store.list("t1", Some("gmail")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].account, DEFAULT_ACCOUNT);

        store.delete("t1", "gmail", DEFAULT_ACCOUNT).await.unwrap();
        assert!(store.get("t1", "gmail", DEFAULT_ACCOUNT).await.unwrap().is_none());
    }
}
