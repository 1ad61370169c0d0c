//! Registry owning one breaker per tenant, composed with the pool registry.
//!
//! `execute` decorates a task with outcome accounting and schedules the
//! decorated task on the tenant's pool. A breaker rejection short-circuits
//! before any pool submission, so an open tenant costs nothing but the
//! rejection counter.
use crate::{BreakerConfig, BreakerStats, CircuitBreaker};
use async_trait::async_trait;
use courier_core::Error;
use courier_pool::PoolRegistry;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Where breaker thresholds come from; implementations resolve the DEFAULT
/// profile for unknown tenants.
#[async_trait]
pub trait BreakerConfigSource: Send + Sync + 'static {
    async fn breaker_config(&self, tenant_id: &str) -> BreakerConfig;
}

/// Fixed-profile source for tests and standalone use.
pub struct StaticBreakerConfig(pub BreakerConfig);

#[async_trait]
impl BreakerConfigSource for StaticBreakerConfig {
    async fn breaker_config(&self, _tenant_id: &str) -> BreakerConfig {
        self.0.clone()
    }
}

pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    pools: Arc<PoolRegistry>,
    source: Arc<dyn BreakerConfigSource>,
}

impl BreakerRegistry {
    pub fn new(pools: Arc<PoolRegistry>, source: Arc<dyn BreakerConfigSource>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            pools,
            source,
        }
    }

    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    pub async fn ensure_breaker(&self, tenant_id: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(tenant_id) {
            return Arc::clone(breaker);
        }
        let cfg = self.source.breaker_config(tenant_id).await;
        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get(tenant_id) {
            return Arc::clone(breaker);
        }
        let breaker = Arc::new(CircuitBreaker::new(tenant_id, cfg));
        breakers.insert(tenant_id.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Runs `task` for the tenant, gated by its breaker and scheduled on its
    /// pool. The terminal outcome (success or failure) is the single sample
    /// recorded against the breaker.
    pub async fn execute<T, F, Fut>(&self, tenant_id: &str, task: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let breaker = self.ensure_breaker(tenant_id).await;
        let admission = breaker.try_acquire()?;

        let recorder = Arc::clone(&breaker);
        let ran = Arc::new(AtomicBool::new(false));
        let ran_flag = Arc::clone(&ran);
        let submission = self
            .pools
            .submit(tenant_id, move |worker: String| async move {
                ran_flag.store(true, Ordering::SeqCst);
                let outcome = task(worker).await;
                recorder.record(admission, outcome.is_ok());
                outcome
            })
            .await;
        let result = submission.await;
        if !ran.load(Ordering::SeqCst) {
            // The pool dropped the job before it could run; the admission
            // never produced a sample, so hand back any probe permit.
            breaker.cancel(admission);
        }
        result
    }

    pub async fn is_healthy(&self, tenant_id: &str) -> bool {
        match self.breakers.read().await.get(tenant_id) {
            Some(breaker) => breaker.is_healthy(),
            // No breaker yet means no recorded failures.
            None => true,
        }
    }

    pub async fn stats(&self, tenant_id: &str) -> Option<BreakerStats> {
        self.breakers
            .read()
            .await
            .get(tenant_id)
            .map(|breaker| breaker.stats())
    }

    /// All breaker stats, keyed and ordered by tenant id.
    pub async fn all(&self) -> BTreeMap<String, BreakerStats> {
        self.breakers
            .read()
            .await
            .iter()
            .map(|(tenant, breaker)| (tenant.clone(), breaker.stats()))
            .collect()
    }

    pub async fn force_open(&self, tenant_id: &str) {
        self.ensure_breaker(tenant_id).await.force_open();
    }

    pub async fn force_closed(&self, tenant_id: &str) {
        self.ensure_breaker(tenant_id).await.force_closed();
    }

    pub async fn force_half_open(&self, tenant_id: &str) {
        self.ensure_breaker(tenant_id).await.force_half_open();
    }

    /// Drops the tenant's breaker. Called by tenant garbage collection after
    /// the removal grace period.
    pub async fn remove(&self, tenant_id: &str) -> bool {
        self.breakers.write().await.remove(tenant_id).is_some()
    }
}
