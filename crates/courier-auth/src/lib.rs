//! Per-tenant credential lifecycle.
//!
//! # Purpose
//! Supplies a valid bearer credential for a tenant's forward call with at
//! most one in-flight token refresh per tenant. Concurrent callers that find
//! an expired credential all await the same refresh; a refresh failure is
//! observed by every awaiter and clears the slot so the next caller retries.
//!
//! # Security boundary
//! Access tokens are bearer secrets. They are redacted from `Debug` output
//! and never logged.
pub mod token;

pub use token::TokenClient;

use courier_core::{Error, TenantConfig};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use utoipa::ToSchema;

/// A tenant credential with expiry tracking.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Wall-clock issue time, for outcome reporting and diagnostics.
    pub issued_at_millis: u64,
    /// Monotonic expiry deadline.
    pub expires_at: Instant,
}

impl Credential {
    pub fn new(access_token: String, refresh_token: Option<String>, lifetime: Duration) -> Self {
        Self {
            access_token,
            refresh_token,
            issued_at_millis: courier_core::now_millis(),
            expires_at: Instant::now() + lifetime,
        }
    }

    /// True when the credential is still usable `margin` from now.
    pub fn valid_for(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }

    /// Header value for forward requests: `header_prefix + token`.
    pub fn header_value(&self, cfg: &TenantConfig) -> String {
        format!("{}{}", cfg.auth_body.header_prefix, self.access_token)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("issued_at_millis", &self.issued_at_millis)
            .finish()
    }
}

/// Cache-level counters surfaced on the monitoring health rollup.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub tracked_tenants: usize,
    pub cached_tokens: usize,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential, Error>>>;

#[derive(Default)]
struct Slot {
    credential: Option<Credential>,
    inflight: Option<SharedRefresh>,
}

/// Margin subtracted from expiry so a credential returned as valid is not
/// already dead by the time the forward request goes out.
const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(30);

pub struct CredentialCache {
    client: TokenClient,
    safety_margin: Duration,
    slots: RwLock<HashMap<String, Arc<AsyncMutex<Slot>>>>,
}

impl CredentialCache {
    pub fn new(client: TokenClient) -> Self {
        Self::with_safety_margin(client, DEFAULT_SAFETY_MARGIN)
    }

    pub fn with_safety_margin(client: TokenClient, safety_margin: Duration) -> Self {
        Self {
            client,
            safety_margin,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a credential guaranteed non-expired at return time,
    /// refreshing through the tenant's single-flight slot when needed.
    pub async fn ensure_valid(
        &self,
        tenant_id: &str,
        cfg: &TenantConfig,
    ) -> Result<Credential, Error> {
        let slot = self.slot(tenant_id).await;
        let refresh = {
            let mut guard = slot.lock().await;
            if let Some(credential) = &guard.credential {
                if credential.valid_for(self.safety_margin) {
                    return Ok(credential.clone());
                }
            }
            match &guard.inflight {
                Some(shared) => shared.clone(),
                None => {
                    let client = self.client.clone();
                    let cfg = cfg.clone();
                    let tenant = tenant_id.to_string();
                    let fut: BoxFuture<'static, Result<Credential, Error>> =
                        async move {
                            tracing::info!(tenant = %tenant, "refreshing tenant credential");
                            client.fetch(&cfg).await
                        }
                        .boxed();
                    let shared = fut.shared();
                    guard.inflight = Some(shared.clone());
                    shared
                }
            }
        };
        let result = refresh.clone().await;
        let mut guard = slot.lock().await;
        if let Some(current) = &guard.inflight {
            if current.ptr_eq(&refresh) {
                guard.inflight = None;
                if let Ok(credential) = &result {
                    guard.credential = Some(credential.clone());
                }
            }
        }
        result
    }

    /// Drops the cached credential, typically after a 401-class response.
    /// The next `ensure_valid` performs a fresh exchange.
    pub async fn invalidate(&self, tenant_id: &str) {
        if let Some(slot) = self.slots.read().await.get(tenant_id) {
            slot.lock().await.credential = None;
            tracing::info!(tenant = %tenant_id, "credential invalidated");
        }
    }

    /// Removes the tenant's slot entirely (tenant garbage collection).
    pub async fn remove(&self, tenant_id: &str) -> bool {
        self.slots.write().await.remove(tenant_id).is_some()
    }

    pub async fn stats(&self) -> CacheStats {
        let slots = self.slots.read().await;
        let mut cached = 0;
        for slot in slots.values() {
            if slot.lock().await.credential.is_some() {
                cached += 1;
            }
        }
        CacheStats {
            tracked_tenants: slots.len(),
            cached_tokens: cached,
        }
    }

    async fn slot(&self, tenant_id: &str) -> Arc<AsyncMutex<Slot>> {
        if let Some(slot) = self.slots.read().await.get(tenant_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(tenant_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(Slot::default()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    async fn serve_token_endpoint(
        router: Router,
    ) -> anyhow::Result<(SocketAddr, oneshot::Sender<()>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });
        Ok((addr, shutdown_tx))
    }

    fn tenant_cfg(auth_endpoint: String) -> TenantConfig {
        TenantConfig {
            business_unit: "T".to_string(),
            auth_endpoint,
            token_lifetime_secs: 600,
            ..TenantConfig::default()
        }
    }

    #[test]
    fn credential_expiry_respects_safety_margin() {
        let credential = Credential::new("tok".into(), None, Duration::from_secs(10));
        assert!(credential.valid_for(Duration::from_secs(1)));
        assert!(!credential.valid_for(Duration::from_secs(60)));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let credential = Credential::new("supersecret".into(), Some("r".into()), Duration::from_secs(10));
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("supersecret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn fifty_concurrent_callers_share_one_refresh() -> anyhow::Result<()> {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/oauth/token",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    // Slow enough that all fifty callers pile onto the slot.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Json(serde_json::json!({ "access_token": "shared-token" }))
                }
            }),
        );
        let (addr, shutdown_tx) = serve_token_endpoint(router).await?;
        let cfg = tenant_cfg(format!("http://{addr}/oauth/token"));

        let cache = Arc::new(CredentialCache::new(TokenClient::default()));
        let mut callers = Vec::new();
        for _ in 0..50 {
            let cache = Arc::clone(&cache);
            let cfg = cfg.clone();
            callers.push(tokio::spawn(async move {
                cache.ensure_valid("T", &cfg).await
            }));
        }
        let mut tokens = Vec::new();
        for caller in callers {
            tokens.push(caller.await.expect("join")?);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let first = &tokens[0];
        for credential in &tokens {
            assert_eq!(credential.access_token, "shared-token");
            assert_eq!(credential.issued_at_millis, first.issued_at_millis);
        }
        let _ = shutdown_tx.send(());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_failure_reaches_all_awaiters_then_clears() -> anyhow::Result<()> {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/oauth/token",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    // Slow enough that every concurrent caller joins the
                    // first flight before it resolves.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if n == 0 {
                        // First exchange fails; the retry succeeds.
                        Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
                    } else {
                        Ok(Json(serde_json::json!({ "access_token": "after-retry" })))
                    }
                }
            }),
        );
        let (addr, shutdown_tx) = serve_token_endpoint(router).await?;
        let cfg = tenant_cfg(format!("http://{addr}/oauth/token"));
        let cache = Arc::new(CredentialCache::new(TokenClient::default()));

        let mut callers = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let cfg = cfg.clone();
            callers.push(tokio::spawn(async move {
                cache.ensure_valid("T", &cfg).await
            }));
        }
        let mut failures = 0;
        for caller in callers {
            if caller.await.expect("join").is_err() {
                failures += 1;
            }
        }
        // Every awaiter of the single first flight saw the same error.
        assert_eq!(failures, 8);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // The slot cleared, so the next caller retries and succeeds.
        let credential = cache.ensure_valid("T", &cfg).await.expect("retry");
        assert_eq!(credential.access_token, "after-retry");
        let _ = shutdown_tx.send(());
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_exchange() -> anyhow::Result<()> {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/oauth/token",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({ "access_token": format!("tok-{n}") }))
                }
            }),
        );
        let (addr, shutdown_tx) = serve_token_endpoint(router).await?;
        let cfg = tenant_cfg(format!("http://{addr}/oauth/token"));
        let cache = CredentialCache::new(TokenClient::default());

        let first = cache.ensure_valid("T", &cfg).await?;
        let cached = cache.ensure_valid("T", &cfg).await?;
        assert_eq!(first.access_token, cached.access_token);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        cache.invalidate("T").await;
        let refreshed = cache.ensure_valid("T", &cfg).await?;
        assert_eq!(refreshed.access_token, "tok-1");
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert_eq!(cache.stats().await.cached_tokens, 1);
        let _ = shutdown_tx.send(());
        Ok(())
    }
}
