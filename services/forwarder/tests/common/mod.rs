// Shared test harness: the full service wired over in-memory components,
// served on an ephemeral port. Helpers follow the no-hang rules used across
// the repo: strict client timeouts, readiness by bind, graceful shutdown.
#![allow(dead_code)]
use axum::Router;
use courier_auth::{CredentialCache, TokenClient};
use courier_breaker::BreakerRegistry;
use courier_core::TenantConfig;
use courier_pool::PoolRegistry;
use forwarder::app::{build_router, AppState};
use forwarder::broker::{run_predispatch, InMemoryBroker, MessageBroker};
use forwarder::processor::{IdentityDecryptor, TenantProcessor};
use forwarder::routes::RouteManager;
use forwarder::sink::MemorySink;
use forwarder::store::{MemoryConfigStore, StoreConfigSource, TenantConfigStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub struct Harness {
    pub base_url: String,
    pub client: reqwest::Client,
    pub store: Arc<MemoryConfigStore>,
    pub broker: Arc<InMemoryBroker>,
    pub sink: Arc<MemorySink>,
    pub pools: Arc<PoolRegistry>,
    pub breakers: Arc<BreakerRegistry>,
    pub credentials: Arc<CredentialCache>,
    pub routes: Arc<RouteManager>,
    pub processor: Arc<TenantProcessor>,
    cancel: CancellationToken,
    _shutdown_tx: oneshot::Sender<()>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn harness() -> Harness {
    let store = Arc::new(MemoryConfigStore::with_default_profile().await);
    let configs = Arc::new(StoreConfigSource::new(
        Arc::clone(&store) as Arc<dyn TenantConfigStore>
    ));
    let pools = Arc::new(PoolRegistry::new(
        Arc::clone(&configs) as Arc<dyn courier_pool::PoolConfigSource>
    ));
    let breakers = Arc::new(BreakerRegistry::new(
        Arc::clone(&pools),
        Arc::clone(&configs) as Arc<dyn courier_breaker::BreakerConfigSource>,
    ));
    let credentials = Arc::new(CredentialCache::with_safety_margin(
        TokenClient::default(),
        Duration::from_secs(5),
    ));
    let sink = Arc::new(MemorySink::new());
    let processor = Arc::new(TenantProcessor::new(
        Arc::clone(&breakers),
        Arc::clone(&credentials),
        Arc::clone(&configs),
        Arc::clone(&sink) as _,
        Arc::new(IdentityDecryptor),
        reqwest::Client::new(),
    ));
    let broker = Arc::new(InMemoryBroker::with_ingress_topology().await);
    let routes = Arc::new(RouteManager::new(
        Arc::clone(&store) as Arc<dyn TenantConfigStore>,
        Arc::clone(&broker) as Arc<dyn MessageBroker>,
        Arc::clone(&processor),
        Arc::clone(&pools),
        Arc::clone(&breakers),
        Arc::clone(&credentials),
        Duration::from_millis(500),
    ));

    let cancel = CancellationToken::new();
    tokio::spawn(run_predispatch(
        Arc::clone(&broker) as Arc<dyn MessageBroker>,
        cancel.clone(),
    ));

    let state = AppState {
        store: Arc::clone(&store) as Arc<dyn TenantConfigStore>,
        pools: Arc::clone(&pools),
        breakers: Arc::clone(&breakers),
        credentials: Arc::clone(&credentials),
        routes: Arc::clone(&routes),
    };
    let router = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind api");
    let addr = listener.local_addr().expect("api addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    Harness {
        base_url: format!("http://{addr}"),
        client: build_test_client(),
        store,
        broker,
        sink,
        pools,
        breakers,
        credentials,
        routes,
        processor,
        cancel,
        _shutdown_tx: shutdown_tx,
    }
}

/// Minimal control API wired over an arbitrary store implementation, for
/// failure-injection tests. Returns the base URL, a strict client, and the
/// server shutdown guard.
pub async fn api_over_store(
    store: Arc<dyn TenantConfigStore>,
) -> (String, reqwest::Client, oneshot::Sender<()>) {
    let configs = Arc::new(StoreConfigSource::new(Arc::clone(&store)));
    let pools = Arc::new(PoolRegistry::new(
        Arc::clone(&configs) as Arc<dyn courier_pool::PoolConfigSource>
    ));
    let breakers = Arc::new(BreakerRegistry::new(
        Arc::clone(&pools),
        Arc::clone(&configs) as Arc<dyn courier_breaker::BreakerConfigSource>,
    ));
    let credentials = Arc::new(CredentialCache::with_safety_margin(
        TokenClient::default(),
        Duration::from_secs(5),
    ));
    let sink = Arc::new(MemorySink::new());
    let processor = Arc::new(TenantProcessor::new(
        Arc::clone(&breakers),
        Arc::clone(&credentials),
        Arc::clone(&configs),
        Arc::clone(&sink) as _,
        Arc::new(IdentityDecryptor),
        reqwest::Client::new(),
    ));
    let broker = Arc::new(InMemoryBroker::new());
    let routes = Arc::new(RouteManager::new(
        Arc::clone(&store),
        Arc::clone(&broker) as Arc<dyn MessageBroker>,
        Arc::clone(&processor),
        Arc::clone(&pools),
        Arc::clone(&breakers),
        Arc::clone(&credentials),
        Duration::from_millis(500),
    ));
    let state = AppState {
        store,
        pools,
        breakers,
        credentials,
        routes,
    };
    let router = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind api");
    let addr = listener.local_addr().expect("api addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });
    (format!("http://{addr}"), build_test_client(), shutdown_tx)
}

pub fn build_test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("build test http client")
}

/// Serves a stub tenant/token endpoint on an ephemeral port.
pub async fn serve_stub(router: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });
    (addr, shutdown_tx)
}

/// Tenant profile tuned for fast tests: small pool, one attempt, no jitter.
pub fn fast_tenant(tenant: &str, version: u64) -> TenantConfig {
    TenantConfig {
        business_unit: tenant.to_string(),
        version,
        core_workers: 2,
        max_workers: 4,
        queue_capacity: 64,
        idle_keep_alive_secs: 1,
        failure_rate_threshold_pct: 50.0,
        min_calls_before_eval: 10,
        open_state_duration_secs: 60,
        sliding_window_size: 20,
        half_open_probe_count: 3,
        max_attempts: 1,
        initial_delay_ms: 10,
        backoff_multiplier: 1.0,
        jitter_fraction: 0.0,
        token_lifetime_secs: 600,
        api_timeout_secs: 2,
        ..TenantConfig::default()
    }
}

/// Polls until `pred` holds or the deadline passes.
pub async fn wait_for<F, Fut>(what: &str, mut pred: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if pred().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    outcome.unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}
