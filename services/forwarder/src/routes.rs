//! Dynamic route manager.
//!
//! # Purpose
//! Maintains the set of per-tenant ingest loops and reconciles them against
//! the config store. Three triggers feed the same authoritative reconcile
//! routine: change-notification webhooks (the fast path), the periodic full
//! reload (the safety net), and manual refresh commands. Applying the same
//! `(tenant, version)` twice is a no-op.
//!
//! # Concurrency
//! Reconciliation for different tenants proceeds in parallel; per tenant it
//! is serialized through a tenant-keyed lock. Between stopping an old loop
//! and starting its replacement, inbound messages buffer on the broker, not
//! in this process.
use crate::broker::{Delivery, MessageBroker};
use crate::processor::TenantProcessor;
use crate::store::TenantConfigStore;
use courier_auth::CredentialCache;
use courier_breaker::BreakerRegistry;
use courier_core::{Error, TenantConfig};
use courier_pool::PoolRegistry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a reconcile pass did for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Replaced,
    Unchanged,
    Removed,
}

struct RouteEntry {
    route_id: String,
    config_version: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

// How long breaker and credential state outlives a removed tenant, so
// in-flight settlement still has its failure accounting.
const TENANT_GC_GRACE: Duration = Duration::from_secs(60);

pub struct RouteManager {
    store: Arc<dyn TenantConfigStore>,
    broker: Arc<dyn MessageBroker>,
    processor: Arc<TenantProcessor>,
    pools: Arc<PoolRegistry>,
    breakers: Arc<BreakerRegistry>,
    credentials: Arc<CredentialCache>,
    routes: RwLock<HashMap<String, RouteEntry>>,
    tenant_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    drain: Duration,
}

impl RouteManager {
    pub fn new(
        store: Arc<dyn TenantConfigStore>,
        broker: Arc<dyn MessageBroker>,
        processor: Arc<TenantProcessor>,
        pools: Arc<PoolRegistry>,
        breakers: Arc<BreakerRegistry>,
        credentials: Arc<CredentialCache>,
        drain: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            processor,
            pools,
            breakers,
            credentials,
            routes: RwLock::new(HashMap::new()),
            tenant_locks: StdMutex::new(HashMap::new()),
            drain,
        }
    }

    pub async fn active_routes(&self) -> BTreeMap<String, String> {
        self.routes
            .read()
            .await
            .iter()
            .map(|(tenant, entry)| (tenant.clone(), entry.route_id.clone()))
            .collect()
    }

    pub async fn active_route_count(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn has_active_route(&self, tenant_id: &str) -> bool {
        self.routes.read().await.contains_key(tenant_id)
    }

    /// Brings one tenant's route into agreement with the config store:
    /// creates a missing loop, replaces one whose version changed, leaves a
    /// matching one alone. Errors with `NotFound` when the store has no
    /// document for the tenant.
    pub async fn reconcile_tenant(&self, tenant_id: &str) -> Result<ReconcileAction, Error> {
        if tenant_id.trim().is_empty() {
            return Err(Error::InvalidRequest("partnerId is required".into()));
        }
        let lock = self.tenant_lock(tenant_id);
        let _serialized = lock.lock().await;

        let config = self
            .store
            .get(tenant_id)
            .await
            .map_err(|err| Error::Internal(format!("config store lookup failed: {err}")))?
            .ok_or_else(|| Error::NotFound(tenant_id.to_string()))?;
        config.validate()?;

        let existing_version = {
            let routes = self.routes.read().await;
            routes.get(tenant_id).map(|entry| entry.config_version)
        };
        match existing_version {
            Some(version) if version == config.version => {
                tracing::debug!(tenant = %tenant_id, version, "route already at config version");
                Ok(ReconcileAction::Unchanged)
            }
            Some(_) => {
                self.stop_route(tenant_id).await?;
                self.start_route(config).await?;
                tracing::info!(tenant = %tenant_id, "route replaced for new config version");
                Ok(ReconcileAction::Replaced)
            }
            None => {
                self.start_route(config).await?;
                tracing::info!(tenant = %tenant_id, "route created");
                Ok(ReconcileAction::Created)
            }
        }
    }

    /// Stops the tenant's loop and releases its pool. Breaker and credential
    /// state stay behind for a grace period to absorb in-flight settlement,
    /// then get collected. Returns whether a route existed; a loop that
    /// fails to stop surfaces as an internal error for the API to report.
    pub async fn remove_tenant(&self, tenant_id: &str) -> Result<bool, Error> {
        let lock = self.tenant_lock(tenant_id);
        let _serialized = lock.lock().await;
        let removed = self.stop_route(tenant_id).await?;
        if removed {
            self.pools.remove(tenant_id, self.drain).await;
            let breakers = Arc::clone(&self.breakers);
            let credentials = Arc::clone(&self.credentials);
            let tenant = tenant_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(TENANT_GC_GRACE).await;
                breakers.remove(&tenant).await;
                credentials.remove(&tenant).await;
                tracing::debug!(tenant = %tenant, "breaker and credential state collected");
            });
            tracing::info!(tenant = %tenant_id, "route removed");
        }
        Ok(removed)
    }

    /// Full reload: reconciles every stored tenant and removes routes whose
    /// tenants disappeared from the store. Per-tenant failures are logged
    /// and do not abort the pass.
    pub async fn reconcile_all(&self) -> Result<(), Error> {
        let configs = self
            .store
            .load_all()
            .await
            .map_err(|err| Error::Internal(format!("config store reload failed: {err}")))?;

        let reconciles = configs
            .keys()
            .filter(|tenant| tenant.as_str() != courier_core::DEFAULT_TENANT)
            .map(|tenant| async move {
                if let Err(err) = self.reconcile_tenant(tenant).await {
                    tracing::warn!(tenant = %tenant, error = %err, "tenant reconcile failed");
                }
            });
        futures::future::join_all(reconciles).await;

        // Routes for tenants no longer in the store are retired.
        let stale: Vec<String> = {
            let routes = self.routes.read().await;
            routes
                .keys()
                .filter(|tenant| !configs.contains_key(*tenant))
                .cloned()
                .collect()
        };
        for tenant in stale {
            if let Err(err) = self.remove_tenant(&tenant).await {
                tracing::warn!(tenant = %tenant, error = %err, "stale route removal failed");
            }
        }
        Ok(())
    }

    /// Background safety net: periodically reload the store and reconcile.
    pub async fn run_reload_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            // Reload failures are non-fatal: the next tick tries again and
            // webhooks still apply targeted updates in the meantime.
            if let Err(err) = self.reconcile_all().await {
                tracing::warn!(error = %err, "periodic config reload failed");
            }
        }
        tracing::debug!("config reload loop stopped");
    }

    /// Stops every route in sorted tenant order. Used on process shutdown.
    pub async fn shutdown(&self) {
        let tenants: Vec<String> = {
            let routes = self.routes.read().await;
            let mut tenants: Vec<String> = routes.keys().cloned().collect();
            tenants.sort();
            tenants
        };
        for tenant in tenants {
            if let Err(err) = self.stop_route(&tenant).await {
                tracing::warn!(tenant = %tenant, error = %err, "route stop failed during shutdown");
            }
        }
    }

    async fn start_route(&self, config: TenantConfig) -> Result<(), Error> {
        let tenant_id = config.business_unit.clone();
        let queue = config.queue_name();
        self.broker
            .declare_queue(&queue)
            .await
            .map_err(|err| Error::Internal(format!("declare {queue} failed: {err}")))?;
        let consumer = self
            .broker
            .subscribe(&queue)
            .await
            .map_err(|err| Error::Internal(format!("subscribe {queue} failed: {err}")))?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ingest_loop(
            tenant_id.clone(),
            consumer,
            Arc::clone(&self.processor),
            config.max_concurrent_calls.max(1),
            cancel.clone(),
        ));
        let entry = RouteEntry {
            route_id: courier_core::tenant_route_id(&tenant_id),
            config_version: config.version,
            cancel,
            handle,
        };
        self.routes.write().await.insert(tenant_id, entry);
        Ok(())
    }

    async fn stop_route(&self, tenant_id: &str) -> Result<bool, Error> {
        let entry = self.routes.write().await.remove(tenant_id);
        let Some(entry) = entry else {
            return Ok(false);
        };
        entry.cancel.cancel();
        if tokio::time::timeout(self.drain, entry.handle).await.is_err() {
            // The loop is cancelled but wedged; the route entry is already
            // gone, so report the failure rather than pretending the stop
            // completed.
            return Err(Error::Internal(format!(
                "ingest loop for {tenant_id} did not stop within the drain window"
            )));
        }
        Ok(true)
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.tenant_locks.lock().expect("tenant locks");
        Arc::clone(
            locks
                .entry(tenant_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }
}

/// One tenant's ingest loop: consumes the tenant queue in broker order and
/// dispatches each message to the processor, bounded by the tenant's
/// `maxConcurrentCalls`. Dispatch preserves arrival order; completion order
/// across messages is not guaranteed.
async fn ingest_loop(
    tenant_id: String,
    mut consumer: Box<dyn crate::broker::MessageConsumer>,
    processor: Arc<TenantProcessor>,
    max_concurrent: usize,
    cancel: CancellationToken,
) {
    let in_flight = Arc::new(Semaphore::new(max_concurrent));
    tracing::info!(tenant = %tenant_id, max_concurrent, "ingest loop started");
    loop {
        let delivery: Option<Delivery> = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            delivery = consumer.recv() => delivery,
        };
        let Some(delivery) = delivery else { break };
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&in_flight).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let processor = Arc::clone(&processor);
        let tenant = tenant_id.clone();
        tokio::spawn(async move {
            let _in_flight = permit;
            if let Err(err) = processor.process(&tenant, delivery).await {
                tracing::warn!(tenant = %tenant, error = %err, "message processing failed");
            }
        });
    }
    tracing::info!(tenant = %tenant_id, "ingest loop stopped");
}
