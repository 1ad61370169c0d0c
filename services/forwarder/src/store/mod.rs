//! Tenant config store seam.
//!
//! # Purpose
//! The config store is an external document index keyed by tenant id. This
//! module defines the trait the rest of the service programs against, plus
//! the adapter that turns stored documents into pool and breaker profiles
//! with DEFAULT fallback for unknown tenants.
pub mod elastic;
pub mod memory;

pub use elastic::ElasticConfigStore;
pub use memory::MemoryConfigStore;

use async_trait::async_trait;
use courier_breaker::{BreakerConfig, BreakerConfigSource};
use courier_core::TenantConfig;
use courier_pool::{PoolConfig, PoolConfigSource};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid config document: {0}")]
    InvalidDocument(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TenantConfigStore: Send + Sync + 'static {
    /// Current config for one tenant, if stored.
    async fn get(&self, tenant_id: &str) -> StoreResult<Option<TenantConfig>>;
    /// Full reload of every stored config, keyed by tenant id.
    async fn load_all(&self) -> StoreResult<HashMap<String, TenantConfig>>;
    /// Installs or replaces a tenant config.
    async fn upsert(&self, config: TenantConfig) -> StoreResult<()>;
    /// Removes a tenant config; returns whether it existed.
    async fn remove(&self, tenant_id: &str) -> StoreResult<bool>;
}

/// Resolves effective configs with DEFAULT fallback and feeds the pool and
/// breaker registries. Store outages degrade to the DEFAULT profile rather
/// than blocking task submission.
pub struct StoreConfigSource {
    store: Arc<dyn TenantConfigStore>,
}

impl StoreConfigSource {
    pub fn new(store: Arc<dyn TenantConfigStore>) -> Self {
        Self { store }
    }

    /// Effective config for a tenant: its own document, else the stored
    /// DEFAULT document, else the built-in DEFAULT profile.
    pub async fn resolve(&self, tenant_id: &str) -> TenantConfig {
        match self.store.get(tenant_id).await {
            Ok(Some(config)) => return config,
            Ok(None) => {
                tracing::debug!(tenant = %tenant_id, "no stored config, falling back to DEFAULT");
            }
            Err(err) => {
                tracing::warn!(tenant = %tenant_id, error = %err, "config lookup failed, using DEFAULT");
            }
        }
        match self.store.get(courier_core::DEFAULT_TENANT).await {
            Ok(Some(default)) => default,
            _ => TenantConfig::default(),
        }
    }
}

#[async_trait]
impl PoolConfigSource for StoreConfigSource {
    async fn pool_config(&self, tenant_id: &str) -> PoolConfig {
        PoolConfig::from(&self.resolve(tenant_id).await)
    }
}

#[async_trait]
impl BreakerConfigSource for StoreConfigSource {
    async fn breaker_config(&self, tenant_id: &str) -> BreakerConfig {
        BreakerConfig::from(&self.resolve(tenant_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_prefers_tenant_then_default_document() {
        let store = Arc::new(MemoryConfigStore::new());
        store
            .upsert(TenantConfig {
                business_unit: "DEFAULT".to_string(),
                core_workers: 7,
                max_workers: 21,
                ..TenantConfig::default()
            })
            .await
            .expect("seed default");
        store
            .upsert(TenantConfig {
                business_unit: "AMAZON".to_string(),
                core_workers: 10,
                max_workers: 50,
                queue_capacity: 2000,
                ..TenantConfig::default()
            })
            .await
            .expect("seed tenant");

        let source = StoreConfigSource::new(store);
        assert_eq!(source.resolve("AMAZON").await.core_workers, 10);
        // Unknown tenants pick up the stored DEFAULT document.
        assert_eq!(source.resolve("UNKNOWN").await.core_workers, 7);
        let pool = source.pool_config("AMAZON").await;
        assert_eq!(pool.queue_capacity, 2000);
    }

    #[tokio::test]
    async fn resolve_survives_missing_default() {
        let source = StoreConfigSource::new(Arc::new(MemoryConfigStore::new()));
        let config = source.resolve("ANYONE").await;
        assert_eq!(config.core_workers, TenantConfig::default().core_workers);
    }
}
