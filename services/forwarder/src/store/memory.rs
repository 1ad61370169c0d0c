//! In-memory config store for local development and tests.
//!
//! Not durable; state is lost on restart. Single-process consistency via a
//! `tokio::sync::RwLock` over the authoritative map, mirroring how the
//! service treats the external index: reads are cheap and concurrent, writes
//! replace whole documents.
use super::{StoreResult, TenantConfigStore};
use async_trait::async_trait;
use courier_core::TenantConfig;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct MemoryConfigStore {
    configs: RwLock<HashMap<String, TenantConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
        }
    }

    /// Store seeded with the built-in DEFAULT profile, the shape a fresh
    /// deployment starts from before any tenant documents are written.
    pub async fn with_default_profile() -> Self {
        let store = Self::new();
        store
            .configs
            .write()
            .await
            .insert(courier_core::DEFAULT_TENANT.to_string(), TenantConfig::default());
        store
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantConfigStore for MemoryConfigStore {
    async fn get(&self, tenant_id: &str) -> StoreResult<Option<TenantConfig>> {
        Ok(self.configs.read().await.get(tenant_id).cloned())
    }

    async fn load_all(&self) -> StoreResult<HashMap<String, TenantConfig>> {
        Ok(self.configs.read().await.clone())
    }

    async fn upsert(&self, config: TenantConfig) -> StoreResult<()> {
        self.configs
            .write()
            .await
            .insert(config.business_unit.clone(), config);
        Ok(())
    }

    async fn remove(&self, tenant_id: &str) -> StoreResult<bool> {
        Ok(self.configs.write().await.remove(tenant_id).is_some())
    }
}
