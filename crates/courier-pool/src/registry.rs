//! Registry owning one pool per tenant.
//!
//! Pools are created on demand from the tenant's current configuration; a
//! tenant with no stored config gets the DEFAULT profile. Global operations
//! walk tenants in sorted order so tests and operators observe a
//! deterministic sequence.
use crate::{PoolConfig, PoolStats, Submission, TenantPool};
use async_trait::async_trait;
use courier_core::Error;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Where pool sizing comes from. Implementations resolve the DEFAULT profile
/// themselves so the registry never needs to know about the config store.
#[async_trait]
pub trait PoolConfigSource: Send + Sync + 'static {
    async fn pool_config(&self, tenant_id: &str) -> PoolConfig;
}

/// Fixed-profile source for tests and standalone use.
pub struct StaticPoolConfig(pub PoolConfig);

#[async_trait]
impl PoolConfigSource for StaticPoolConfig {
    async fn pool_config(&self, _tenant_id: &str) -> PoolConfig {
        self.0.clone()
    }
}

pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<TenantPool>>>,
    source: Arc<dyn PoolConfigSource>,
}

impl PoolRegistry {
    pub fn new(source: Arc<dyn PoolConfigSource>) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            source,
        }
    }

    /// Returns the tenant's pool, creating it from the current config if this
    /// is the first time the tenant is seen.
    pub async fn ensure_pool(&self, tenant_id: &str) -> Arc<TenantPool> {
        if let Some(pool) = self.pools.read().await.get(tenant_id) {
            return Arc::clone(pool);
        }
        let cfg = self.source.pool_config(tenant_id).await;
        let mut pools = self.pools.write().await;
        // Double-checked: another caller may have created it between locks.
        if let Some(pool) = pools.get(tenant_id) {
            return Arc::clone(pool);
        }
        let pool = TenantPool::new(tenant_id, cfg);
        pools.insert(tenant_id.to_string(), Arc::clone(&pool));
        pool
    }

    /// Schedules `task` on the tenant's pool.
    pub async fn submit<T, F, Fut>(&self, tenant_id: &str, task: F) -> Submission<T>
    where
        T: Send + 'static,
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let pool = self.ensure_pool(tenant_id).await;
        pool.submit(task).await
    }

    pub async fn stats(&self, tenant_id: &str) -> Option<PoolStats> {
        self.pools
            .read()
            .await
            .get(tenant_id)
            .map(|pool| pool.stats())
    }

    /// All pool stats, keyed and ordered by tenant id.
    pub async fn all(&self) -> BTreeMap<String, PoolStats> {
        self.pools
            .read()
            .await
            .iter()
            .map(|(tenant, pool)| (tenant.clone(), pool.stats()))
            .collect()
    }

    pub async fn shutdown(&self, tenant_id: &str, grace: Duration) -> bool {
        let pool = {
            let pools = self.pools.read().await;
            pools.get(tenant_id).map(Arc::clone)
        };
        match pool {
            Some(pool) => {
                pool.shutdown(grace).await;
                true
            }
            None => false,
        }
    }

    /// Shuts down and removes the tenant's pool entirely. Used on explicit
    /// tenant removal; a later submit recreates a fresh pool.
    pub async fn remove(&self, tenant_id: &str, grace: Duration) -> bool {
        let pool = self.pools.write().await.remove(tenant_id);
        match pool {
            Some(pool) => {
                pool.shutdown(grace).await;
                true
            }
            None => false,
        }
    }

    /// Drains every pool in sorted tenant order.
    pub async fn shutdown_all(&self, grace: Duration) {
        let pools: BTreeMap<String, Arc<TenantPool>> = self
            .pools
            .read()
            .await
            .iter()
            .map(|(tenant, pool)| (tenant.clone(), Arc::clone(pool)))
            .collect();
        for (tenant, pool) in pools {
            tracing::debug!(tenant = %tenant, "shutting down pool");
            pool.shutdown(grace).await;
        }
    }
}
