//! Per-message tenant pipeline.
//!
//! # Purpose
//! Runs one inbound message through the ordered stages: validate the tenant
//! header, decrypt headers (pluggable hook), ensure a valid credential,
//! forward to the tenant endpoint with retry, and record the outcome.
//!
//! # Failure accounting
//! The whole pipeline executes as a single breaker-gated job on the tenant's
//! pool: a pre-forward stage failure or the post-retry forward outcome each
//! contribute exactly one sample to the tenant's breaker. Outcome recording
//! is best-effort and never re-fails the pipeline.
use crate::broker::Delivery;
use crate::sink::OutcomeSink;
use crate::store::StoreConfigSource;
use courier_auth::{Credential, CredentialCache};
use courier_breaker::BreakerRegistry;
use courier_core::{Error, OutcomeRecord, TenantConfig};
use rand::Rng;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Hook applied to inbound headers before authentication. The default is
/// identity; deployments with encrypted partner headers install their own.
pub trait HeaderDecryptor: Send + Sync + 'static {
    fn decrypt(&self, headers: &mut HashMap<String, String>) -> Result<(), Error>;
}

pub struct IdentityDecryptor;

impl HeaderDecryptor for IdentityDecryptor {
    fn decrypt(&self, _headers: &mut HashMap<String, String>) -> Result<(), Error> {
        Ok(())
    }
}

pub struct TenantProcessor {
    breakers: Arc<BreakerRegistry>,
    credentials: Arc<CredentialCache>,
    configs: Arc<StoreConfigSource>,
    sink: Arc<dyn OutcomeSink>,
    decryptor: Arc<dyn HeaderDecryptor>,
    http: reqwest::Client,
}

impl TenantProcessor {
    pub fn new(
        breakers: Arc<BreakerRegistry>,
        credentials: Arc<CredentialCache>,
        configs: Arc<StoreConfigSource>,
        sink: Arc<dyn OutcomeSink>,
        decryptor: Arc<dyn HeaderDecryptor>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            breakers,
            credentials,
            configs,
            sink,
            decryptor,
            http,
        }
    }

    /// Processes one delivery for a tenant. The returned error is the same
    /// terminal outcome the breaker sampled.
    pub async fn process(&self, tenant_id: &str, delivery: Delivery) -> Result<(), Error> {
        let cfg = self.configs.resolve(tenant_id).await;
        let stage = PipelineStage {
            tenant_id: tenant_id.to_string(),
            cfg,
            credentials: Arc::clone(&self.credentials),
            sink: Arc::clone(&self.sink),
            decryptor: Arc::clone(&self.decryptor),
            http: self.http.clone(),
        };
        let result = self
            .breakers
            .execute(tenant_id, move |worker| async move {
                stage.run(worker, delivery).await
            })
            .await;
        if let Err(err) = &result {
            match err {
                Error::BreakerOpen(_) | Error::ShuttingDown(_) => {
                    // The pipeline never ran, so the rejection is recorded
                    // here on the dispatch lane.
                    let lane = format!("Partner-{tenant_id}-Dispatcher");
                    let record = OutcomeRecord::failure(tenant_id, 0, &lane, err);
                    record_exception(&self.sink, &record).await;
                }
                _ => {}
            }
        }
        result
    }
}

struct PipelineStage {
    tenant_id: String,
    cfg: TenantConfig,
    credentials: Arc<CredentialCache>,
    sink: Arc<dyn OutcomeSink>,
    decryptor: Arc<dyn HeaderDecryptor>,
    http: reqwest::Client,
}

impl PipelineStage {
    async fn run(self, worker: String, mut delivery: Delivery) -> Result<(), Error> {
        let verdict = self.stages(&mut delivery).await;
        match verdict {
            Ok(attempts) => {
                let record = OutcomeRecord::success(&self.tenant_id, attempts, &worker);
                record_result(&self.sink, &record).await;
                Ok(())
            }
            Err((attempts, err)) => {
                let record = OutcomeRecord::failure(&self.tenant_id, attempts, &worker, &err);
                record_result(&self.sink, &record).await;
                record_exception(&self.sink, &record).await;
                Err(err)
            }
        }
    }

    /// Stages 1-4; returns the forward attempt count on success, or the
    /// attempt count at failure alongside the error.
    async fn stages(&self, delivery: &mut Delivery) -> Result<u32, (u32, Error)> {
        // Stage 1: validate. The record must carry a non-blank tenant header
        // that matches the loop it arrived on.
        match delivery.tenant_id() {
            Some(header) if header == self.tenant_id => {}
            Some(header) => {
                return Err((
                    0,
                    Error::InvalidRequest(format!(
                        "tenant header {header} does not match route {}",
                        self.tenant_id
                    )),
                ));
            }
            None => {
                return Err((
                    0,
                    Error::InvalidRequest("CBUSINESSUNIT header is required".into()),
                ));
            }
        }

        // Stage 2: decrypt headers.
        self.decryptor
            .decrypt(&mut delivery.headers)
            .map_err(|err| (0, err))?;

        // Stage 3: ensure token.
        let credential = self
            .credentials
            .ensure_valid(&self.tenant_id, &self.cfg)
            .await
            .map_err(|err| (0, err))?;

        // Stage 4: forward with retry.
        self.forward(&delivery.payload, credential).await
    }

    async fn forward(
        &self,
        payload: &bytes::Bytes,
        mut credential: Credential,
    ) -> Result<u32, (u32, Error)> {
        let cfg = &self.cfg;
        let mut attempt: u32 = 0;
        // 401-class responses invalidate the credential and grant one retry
        // that does not count against maxAttempts.
        let mut auth_retry_used = false;
        loop {
            attempt += 1;
            let outcome = self.send_once(payload, &credential).await;
            match outcome {
                Ok(()) => return Ok(attempt),
                Err(err @ Error::Auth(_)) => {
                    if auth_retry_used {
                        return Err((attempt, err));
                    }
                    auth_retry_used = true;
                    tracing::info!(tenant = %self.tenant_id, "401-class response, refreshing credential");
                    self.credentials.invalidate(&self.tenant_id).await;
                    credential = self
                        .credentials
                        .ensure_valid(&self.tenant_id, cfg)
                        .await
                        .map_err(|refresh_err| (attempt, refresh_err))?;
                    attempt -= 1;
                }
                Err(err) if err.is_retryable() => {
                    if attempt >= cfg.max_attempts {
                        return Err((attempt, err));
                    }
                    let delay = backoff_delay(cfg, attempt);
                    tracing::debug!(
                        tenant = %self.tenant_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient forward failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err((attempt, err)),
            }
        }
    }

    async fn send_once(&self, payload: &bytes::Bytes, credential: &Credential) -> Result<(), Error> {
        let cfg = &self.cfg;
        let response = self
            .http
            .post(&cfg.api_endpoint)
            .header(
                cfg.auth_body.header_name.as_str(),
                credential.header_value(cfg),
            )
            .body(payload.clone())
            .timeout(cfg.api_timeout())
            .send()
            .await;
        match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    Err(Error::Auth(format!(
                        "{} returned {status}",
                        cfg.api_endpoint
                    )))
                } else if status.is_server_error()
                    || status == StatusCode::REQUEST_TIMEOUT
                    || status == StatusCode::TOO_MANY_REQUESTS
                {
                    Err(Error::Transient(format!(
                        "{} returned {status}",
                        cfg.api_endpoint
                    )))
                } else {
                    Err(Error::Internal(format!(
                        "{} returned unexpected status {status}",
                        cfg.api_endpoint
                    )))
                }
            }
            // Connect failures and per-attempt timeouts are retryable.
            Err(err) => Err(Error::Transient(format!(
                "forward to {} failed: {err}",
                cfg.api_endpoint
            ))),
        }
    }
}

/// Exponential backoff with uniform jitter:
/// `initialDelay * multiplier^(attempt-1)`, scaled by a factor drawn from
/// `[1 - jitter, 1 + jitter]`.
fn backoff_delay(cfg: &TenantConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16) as i32;
    let base = cfg.initial_delay().as_millis() as f64 * cfg.backoff_multiplier.powi(exponent);
    let jitter = cfg.jitter_fraction;
    let factor = if jitter > 0.0 {
        rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
    } else {
        1.0
    };
    Duration::from_millis((base * factor).max(0.0) as u64)
}

async fn record_result(sink: &Arc<dyn OutcomeSink>, record: &OutcomeRecord) {
    let result = match record.result {
        courier_core::OutcomeResult::Success => "success",
        courier_core::OutcomeResult::Failed => "failed",
    };
    metrics::counter!(
        "partner_messages_total",
        "partner" => record.tenant_id.clone(),
        "result" => result
    )
    .increment(1);
    if let Err(err) = sink.record_result(record).await {
        // Reporting the reporter would cascade; log and move on.
        tracing::warn!(tenant = %record.tenant_id, error = %err, "outcome sink write failed");
    }
}

async fn record_exception(sink: &Arc<dyn OutcomeSink>, record: &OutcomeRecord) {
    metrics::counter!(
        "partner_exceptions_total",
        "partner" => record.tenant_id.clone(),
        "kind" => record.error_kind.clone().unwrap_or_else(|| "UNKNOWN".to_string())
    )
    .increment(1);
    if let Err(err) = sink.record_exception(record).await {
        tracing::warn!(tenant = %record.tenant_id, error = %err, "exception sink write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_within_jitter_bounds() {
        let cfg = TenantConfig {
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter_fraction: 0.2,
            ..TenantConfig::default()
        };
        for (attempt, expected) in [(1u32, 100.0f64), (2, 200.0), (3, 400.0)] {
            let delay = backoff_delay(&cfg, attempt).as_millis() as f64;
            assert!(
                delay >= expected * 0.8 - 1.0 && delay <= expected * 1.2 + 1.0,
                "attempt {attempt}: {delay}ms outside jitter bounds of {expected}ms"
            );
        }
    }

    #[test]
    fn backoff_without_jitter_is_deterministic() {
        let cfg = TenantConfig {
            initial_delay_ms: 50,
            backoff_multiplier: 3.0,
            jitter_fraction: 0.0,
            ..TenantConfig::default()
        };
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_millis(50));
        assert_eq!(backoff_delay(&cfg, 2), Duration::from_millis(150));
        assert_eq!(backoff_delay(&cfg, 3), Duration::from_millis(450));
    }
}
