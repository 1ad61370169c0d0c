// Forwarder service main entry point.
use anyhow::{Context, Result};
use courier_auth::{CredentialCache, TokenClient};
use courier_breaker::BreakerRegistry;
use courier_pool::PoolRegistry;
use forwarder::app::{self, AppState};
use forwarder::broker::{self, InMemoryBroker, MessageBroker};
use forwarder::config::ForwarderConfig;
use forwarder::observability;
use forwarder::processor::{IdentityDecryptor, TenantProcessor};
use forwarder::routes::RouteManager;
use forwarder::sink::{ElasticSink, LogSink, OutcomeSink};
use forwarder::store::{
    ElasticConfigStore, MemoryConfigStore, StoreConfigSource, TenantConfigStore,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ForwarderConfig::from_env_or_yaml()?;
    let metrics_handle = observability::init_observability("forwarder");

    let http = reqwest::Client::new();
    let (store, sink): (Arc<dyn TenantConfigStore>, Arc<dyn OutcomeSink>) =
        match &config.elasticsearch_url {
            Some(url) => {
                tracing::info!(url = %url, "using Elasticsearch config store and outcome sink");
                (
                    Arc::new(ElasticConfigStore::new(http.clone(), url.clone())),
                    Arc::new(ElasticSink::new(http.clone(), url.clone())),
                )
            }
            None => {
                tracing::warn!("no COURIER_ES_URL configured, using in-memory store and log sink");
                (
                    Arc::new(MemoryConfigStore::with_default_profile().await),
                    Arc::new(LogSink),
                )
            }
        };

    let configs = Arc::new(StoreConfigSource::new(Arc::clone(&store)));
    let pools = Arc::new(PoolRegistry::new(
        Arc::clone(&configs) as Arc<dyn courier_pool::PoolConfigSource>
    ));
    let breakers = Arc::new(BreakerRegistry::new(
        Arc::clone(&pools),
        Arc::clone(&configs) as Arc<dyn courier_breaker::BreakerConfigSource>,
    ));
    let credentials = Arc::new(CredentialCache::with_safety_margin(
        TokenClient::new(http.clone()),
        config.credential_safety_margin(),
    ));
    let processor = Arc::new(TenantProcessor::new(
        Arc::clone(&breakers),
        Arc::clone(&credentials),
        Arc::clone(&configs),
        Arc::clone(&sink),
        Arc::new(IdentityDecryptor),
        http.clone(),
    ));

    // The AMQP broker is deployed separately; the in-process broker models
    // the same topology for local runs and is replaced by the adapter for
    // the real deployment.
    let message_broker: Arc<dyn MessageBroker> =
        Arc::new(InMemoryBroker::with_ingress_topology().await);
    let routes = Arc::new(RouteManager::new(
        Arc::clone(&store),
        Arc::clone(&message_broker),
        Arc::clone(&processor),
        Arc::clone(&pools),
        Arc::clone(&breakers),
        Arc::clone(&credentials),
        config.route_drain_timeout(),
    ));

    // Seed routes for every tenant already in the store.
    if let Err(err) = routes.reconcile_all().await {
        tracing::warn!(error = %err, "initial route reconciliation failed");
    }
    tracing::info!(
        active_routes = routes.active_route_count().await,
        "route manager initialized"
    );

    let cancel = CancellationToken::new();
    let predispatch = tokio::spawn(broker::run_predispatch(
        Arc::clone(&message_broker),
        cancel.clone(),
    ));
    let reload = tokio::spawn(Arc::clone(&routes).run_reload_loop(
        config.config_reload_interval(),
        cancel.clone(),
    ));

    let metrics_addr = config.metrics_bind;
    let metrics_cancel = cancel.clone();
    let metrics_server = tokio::spawn(async move {
        if let Err(err) =
            observability::serve_metrics(metrics_handle, metrics_addr, metrics_cancel).await
        {
            tracing::warn!(error = %err, "metrics server exited");
        }
    });

    let state = AppState {
        store,
        pools: Arc::clone(&pools),
        breakers,
        credentials,
        routes: Arc::clone(&routes),
    };
    let router = app::build_router(state);
    let listener = tokio::net::TcpListener::bind(config.http_bind)
        .await
        .with_context(|| format!("bind control API on {}", config.http_bind))?;
    tracing::info!(addr = %config.http_bind, "control API listening");

    let api_cancel = cancel.clone();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            api_cancel.cancelled().await;
        },
    );
    let server_task = tokio::spawn(async move {
        if let Err(err) = server.await {
            tracing::error!(error = %err, "control API server exited");
        }
    });

    // Block until SIGINT, then drain.
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested, draining");
    cancel.cancel();
    routes.shutdown().await;
    pools.shutdown_all(config.shutdown_grace()).await;
    let _ = server_task.await;
    let _ = metrics_server.await;
    predispatch.abort();
    reload.abort();
    tracing::info!("forwarder stopped");
    Ok(())
}
