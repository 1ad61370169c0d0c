//! Elasticsearch-backed config store.
//!
//! Documents live in the `partner-configurations` index, one per tenant,
//! keyed by tenant id. Full reload issues a match-all search sized for the
//! whole tenant population; single lookups use the document API. Non-2xx and
//! transport failures surface as `StoreError::Unavailable` and the caller
//! decides whether to degrade to DEFAULT.
use super::{StoreError, StoreResult, TenantConfigStore};
use async_trait::async_trait;
use courier_core::TenantConfig;
use serde::Deserialize;
use std::collections::HashMap;

const CONFIG_INDEX: &str = "partner-configurations";
// Sized for the expected tenant population (~200); well under this cap.
const RELOAD_SIZE: usize = 1000;

pub struct ElasticConfigStore {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GetDocResponse {
    found: bool,
    #[serde(rename = "_source")]
    source: Option<TenantConfig>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: serde_json::Value,
}

impl ElasticConfigStore {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn doc_url(&self, tenant_id: &str) -> String {
        format!("{}/{CONFIG_INDEX}/_doc/{tenant_id}", self.base_url)
    }
}

#[async_trait]
impl TenantConfigStore for ElasticConfigStore {
    async fn get(&self, tenant_id: &str) -> StoreResult<Option<TenantConfig>> {
        let response = self
            .http
            .get(self.doc_url(tenant_id))
            .send()
            .await
            .map_err(|err| StoreError::Unavailable(format!("config get: {err}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|err| StoreError::Unavailable(format!("config get status: {err}")))?;
        let doc: GetDocResponse = response
            .json()
            .await
            .map_err(|err| StoreError::InvalidDocument(format!("config get body: {err}")))?;
        if !doc.found {
            return Ok(None);
        }
        match doc.source {
            Some(config) => {
                config
                    .validate()
                    .map_err(|err| StoreError::InvalidDocument(err.to_string()))?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> StoreResult<HashMap<String, TenantConfig>> {
        let url = format!("{}/{CONFIG_INDEX}/_search", self.base_url);
        let body = serde_json::json!({
            "size": RELOAD_SIZE,
            "query": { "match_all": {} }
        });
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| StoreError::Unavailable(format!("config search: {err}")))?
            .error_for_status()
            .map_err(|err| StoreError::Unavailable(format!("config search status: {err}")))?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|err| StoreError::InvalidDocument(format!("config search body: {err}")))?;

        let mut configs = HashMap::new();
        for hit in parsed.hits.hits {
            // One malformed document must not poison the whole reload.
            match serde_json::from_value::<TenantConfig>(hit.source) {
                Ok(config) => match config.validate() {
                    Ok(()) => {
                        configs.insert(config.business_unit.clone(), config);
                    }
                    Err(err) => {
                        tracing::warn!(doc = %hit.id, error = %err, "skipping invalid config document");
                    }
                },
                Err(err) => {
                    tracing::warn!(doc = %hit.id, error = %err, "skipping unreadable config document");
                }
            }
        }
        Ok(configs)
    }

    async fn upsert(&self, config: TenantConfig) -> StoreResult<()> {
        config
            .validate()
            .map_err(|err| StoreError::InvalidDocument(err.to_string()))?;
        self.http
            .put(self.doc_url(&config.business_unit))
            .json(&config)
            .send()
            .await
            .map_err(|err| StoreError::Unavailable(format!("config upsert: {err}")))?
            .error_for_status()
            .map_err(|err| StoreError::Unavailable(format!("config upsert status: {err}")))?;
        Ok(())
    }

    async fn remove(&self, tenant_id: &str) -> StoreResult<bool> {
        let response = self
            .http
            .delete(self.doc_url(tenant_id))
            .send()
            .await
            .map_err(|err| StoreError::Unavailable(format!("config delete: {err}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response
            .error_for_status()
            .map_err(|err| StoreError::Unavailable(format!("config delete status: {err}")))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    async fn serve(router: Router) -> (SocketAddr, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
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

    fn tenant_doc(tenant: &str) -> serde_json::Value {
        serde_json::to_value(TenantConfig {
            business_unit: tenant.to_string(),
            version: 4,
            ..TenantConfig::default()
        })
        .expect("doc")
    }

    #[tokio::test]
    async fn get_parses_found_documents() {
        let router = Router::new().route(
            "/partner-configurations/_doc/:id",
            get(|Path(id): Path<String>| async move {
                Json(serde_json::json!({ "found": true, "_source": tenant_doc(&id) }))
            }),
        );
        let (addr, shutdown_tx) = serve(router).await;
        let store = ElasticConfigStore::new(reqwest::Client::new(), format!("http://{addr}"));
        let config = store
            .get("AMAZON")
            .await
            .expect("get")
            .expect("document present");
        assert_eq!(config.business_unit, "AMAZON");
        assert_eq!(config.version, 4);
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn get_maps_missing_documents_to_none() {
        let router = Router::new().route(
            "/partner-configurations/_doc/:id",
            get(|| async { (axum::http::StatusCode::NOT_FOUND, "missing") }),
        );
        let (addr, shutdown_tx) = serve(router).await;
        let store = ElasticConfigStore::new(reqwest::Client::new(), format!("http://{addr}"));
        assert!(store.get("NOBODY").await.expect("get").is_none());
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn load_all_skips_broken_documents() {
        let router = Router::new().route(
            "/partner-configurations/_search",
            post(|| async {
                Json(serde_json::json!({
                    "hits": { "hits": [
                        { "_id": "AMAZON", "_source": tenant_doc("AMAZON") },
                        { "_id": "broken", "_source": { "businessUnit": "" } }
                    ]}
                }))
            }),
        );
        let (addr, shutdown_tx) = serve(router).await;
        let store = ElasticConfigStore::new(reqwest::Client::new(), format!("http://{addr}"));
        let all = store.load_all().await.expect("load all");
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("AMAZON"));
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn unreachable_store_reports_unavailable() {
        let store = ElasticConfigStore::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/".to_string(),
        );
        let err = store.get("A").await.expect_err("unreachable");
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
