//! Outcome sink seam.
//!
//! Terminal processing events go to two append-only indices:
//! `message-results` for every message and `message-exceptions` for final
//! failures. Writes are best-effort; a sink outage is logged and swallowed,
//! never re-failing the pipeline that produced the record.
use async_trait::async_trait;
use courier_core::OutcomeRecord;
use std::sync::Mutex;

pub const RESULTS_INDEX: &str = "message-results";
pub const EXCEPTIONS_INDEX: &str = "message-exceptions";

#[async_trait]
pub trait OutcomeSink: Send + Sync + 'static {
    async fn record_result(&self, record: &OutcomeRecord) -> anyhow::Result<()>;
    async fn record_exception(&self, record: &OutcomeRecord) -> anyhow::Result<()>;
}

/// Writes both indices through the Elasticsearch document API.
pub struct ElasticSink {
    http: reqwest::Client,
    base_url: String,
}

impl ElasticSink {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn write(&self, index: &str, record: &OutcomeRecord) -> anyhow::Result<()> {
        self.http
            .post(format!("{}/{index}/_doc", self.base_url))
            .json(record)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl OutcomeSink for ElasticSink {
    async fn record_result(&self, record: &OutcomeRecord) -> anyhow::Result<()> {
        self.write(RESULTS_INDEX, record).await
    }

    async fn record_exception(&self, record: &OutcomeRecord) -> anyhow::Result<()> {
        self.write(EXCEPTIONS_INDEX, record).await
    }
}

/// Default sink when no index is configured: records go to the log stream.
pub struct LogSink;

#[async_trait]
impl OutcomeSink for LogSink {
    async fn record_result(&self, record: &OutcomeRecord) -> anyhow::Result<()> {
        tracing::info!(
            tenant = %record.tenant_id,
            result = ?record.result,
            attempts = record.attempts,
            worker = %record.worker_name,
            "message outcome"
        );
        Ok(())
    }

    async fn record_exception(&self, record: &OutcomeRecord) -> anyhow::Result<()> {
        tracing::warn!(
            tenant = %record.tenant_id,
            kind = record.error_kind.as_deref().unwrap_or("UNKNOWN"),
            message = record.error_message.as_deref().unwrap_or(""),
            "message exception"
        );
        Ok(())
    }
}

/// Capturing sink for tests.
#[derive(Default)]
pub struct MemorySink {
    pub results: Mutex<Vec<OutcomeRecord>>,
    pub exceptions: Mutex<Vec<OutcomeRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<OutcomeRecord> {
        self.results.lock().expect("results lock").clone()
    }

    pub fn exceptions(&self) -> Vec<OutcomeRecord> {
        self.exceptions.lock().expect("exceptions lock").clone()
    }
}

#[async_trait]
impl OutcomeSink for MemorySink {
    async fn record_result(&self, record: &OutcomeRecord) -> anyhow::Result<()> {
        self.results.lock().expect("results lock").push(record.clone());
        Ok(())
    }

    async fn record_exception(&self, record: &OutcomeRecord) -> anyhow::Result<()> {
        self.exceptions
            .lock()
            .expect("exceptions lock")
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn elastic_sink_posts_to_both_indices() {
        let results = Arc::new(AtomicU32::new(0));
        let exceptions = Arc::new(AtomicU32::new(0));
        let r = Arc::clone(&results);
        let e = Arc::clone(&exceptions);
        let router = Router::new()
            .route(
                "/message-results/_doc",
                post(move |Json(_): Json<serde_json::Value>| {
                    let r = Arc::clone(&r);
                    async move {
                        r.fetch_add(1, Ordering::SeqCst);
                        Json(serde_json::json!({"result": "created"}))
                    }
                }),
            )
            .route(
                "/message-exceptions/_doc",
                post(move |Json(_): Json<serde_json::Value>| {
                    let e = Arc::clone(&e);
                    async move {
                        e.fetch_add(1, Ordering::SeqCst);
                        Json(serde_json::json!({"result": "created"}))
                    }
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service()).await;
        });

        let sink = ElasticSink::new(reqwest::Client::new(), format!("http://{addr}"));
        let record = OutcomeRecord::success("A", 1, "Partner-A-Worker-1");
        sink.record_result(&record).await.expect("result write");
        let failure = OutcomeRecord::failure(
            "A",
            3,
            "Partner-A-Worker-1",
            &courier_core::Error::Transient("x".into()),
        );
        sink.record_exception(&failure).await.expect("exception write");
        assert_eq!(results.load(Ordering::SeqCst), 1);
        assert_eq!(exceptions.load(Ordering::SeqCst), 1);
    }
}
