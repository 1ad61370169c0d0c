//! Tenant configuration model.
//!
//! # Purpose
//! `TenantConfig` is the immutable per-tenant document loaded from the config
//! store. A config is identified by `(business_unit, version)`; route
//! reconciliation treats an unchanged version as a no-op.
//!
//! Wire casing is lowerCamelCase to stay compatible with the documents the
//! existing store already holds and with the HTTP clients reading them back.
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// Informational priority tag. Does not affect scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TenantPriority {
    High,
    Medium,
    Low,
}

/// Body shape of the token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthContentType {
    Json,
    Form,
}

/// Expected shape of the token response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthReturnType {
    Json,
    Xml,
}

/// Credential exchange parameters for one tenant.
///
/// `token_key_path` is a dotted path into the response (JSON keys, or XML
/// element names). The extracted token is attached to forward requests as
/// `header_name: header_prefix + token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthBody {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scope: String,
    pub content_type: AuthContentType,
    pub return_type: AuthReturnType,
    pub token_key_path: String,
    pub header_name: String,
    pub header_prefix: String,
}

impl Default for AuthBody {
    fn default() -> Self {
        Self {
            grant_type: "client_credentials".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: String::new(),
            content_type: AuthContentType::Json,
            return_type: AuthReturnType::Json,
            token_key_path: "access_token".to_string(),
            header_name: "Authorization".to_string(),
            header_prefix: "Bearer ".to_string(),
        }
    }
}

/// Immutable per-tenant configuration.
///
/// Durations are carried on the wire as integer fields with a unit suffix
/// (`...Secs`, `...Ms`); accessors below convert to `Duration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    pub business_unit: String,
    #[serde(default)]
    pub version: u64,

    // Pool parameters.
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    #[serde(default = "default_idle_keep_alive_secs")]
    pub idle_keep_alive_secs: u64,

    // Breaker parameters.
    pub failure_rate_threshold_pct: f32,
    pub min_calls_before_eval: u32,
    pub open_state_duration_secs: u64,
    #[serde(default = "default_sliding_window_size")]
    pub sliding_window_size: usize,
    #[serde(default = "default_half_open_probe_count")]
    pub half_open_probe_count: u32,

    // Retry parameters.
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,

    // Auth parameters.
    pub token_lifetime_secs: u64,
    #[serde(default)]
    pub auth_endpoint: String,
    #[serde(default = "default_auth_method")]
    pub auth_method: String,
    #[serde(default)]
    pub auth_body: AuthBody,

    // Forward parameters.
    #[serde(default)]
    pub api_endpoint: String,
    pub api_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    pub priority: TenantPriority,
}

fn default_idle_keep_alive_secs() -> u64 {
    60
}

fn default_sliding_window_size() -> usize {
    20
}

fn default_half_open_probe_count() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_jitter_fraction() -> f64 {
    0.2
}

fn default_auth_method() -> String {
    "POST".to_string()
}

fn default_max_concurrent_calls() -> usize {
    25
}

impl Default for TenantConfig {
    /// The DEFAULT profile applied to tenants with no stored document.
    fn default() -> Self {
        Self {
            business_unit: crate::DEFAULT_TENANT.to_string(),
            version: 0,
            core_workers: 5,
            max_workers: 20,
            queue_capacity: 1000,
            idle_keep_alive_secs: 60,
            failure_rate_threshold_pct: 50.0,
            min_calls_before_eval: 10,
            open_state_duration_secs: 30,
            sliding_window_size: 20,
            half_open_probe_count: 3,
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 1.5,
            jitter_fraction: 0.2,
            token_lifetime_secs: 900,
            auth_endpoint: String::new(),
            auth_method: default_auth_method(),
            auth_body: AuthBody::default(),
            api_endpoint: String::new(),
            api_timeout_secs: 15,
            max_concurrent_calls: 25,
            priority: TenantPriority::Low,
        }
    }
}

impl TenantConfig {
    /// The tenant's durable broker queue.
    pub fn queue_name(&self) -> String {
        crate::tenant_queue_name(&self.business_unit)
    }

    pub fn idle_keep_alive(&self) -> Duration {
        Duration::from_secs(self.idle_keep_alive_secs)
    }

    pub fn open_state_duration(&self) -> Duration {
        Duration::from_secs(self.open_state_duration_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    /// Validates the constraints every installed config must satisfy.
    ///
    /// Invalid documents are rejected at the API boundary and during store
    /// loads; a tenant never observes a half-applied config.
    pub fn validate(&self) -> Result<(), Error> {
        if self.business_unit.trim().is_empty() {
            return Err(Error::InvalidRequest("businessUnit is required".into()));
        }
        if self.core_workers == 0 {
            return Err(Error::InvalidRequest(
                "coreWorkers must be greater than 0".into(),
            ));
        }
        if self.max_workers < self.core_workers {
            return Err(Error::InvalidRequest(
                "maxWorkers must be >= coreWorkers".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidRequest(
                "queueCapacity must be greater than 0".into(),
            ));
        }
        if self.failure_rate_threshold_pct <= 0.0 || self.failure_rate_threshold_pct > 100.0 {
            return Err(Error::InvalidRequest(
                "failureRateThresholdPct must be in (0, 100]".into(),
            ));
        }
        if self.min_calls_before_eval == 0 {
            return Err(Error::InvalidRequest(
                "minCallsBeforeEval must be greater than 0".into(),
            ));
        }
        if self.sliding_window_size == 0 {
            return Err(Error::InvalidRequest(
                "slidingWindowSize must be greater than 0".into(),
            ));
        }
        if self.half_open_probe_count == 0 {
            return Err(Error::InvalidRequest(
                "halfOpenProbeCount must be greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidRequest(
                "maxAttempts must be at least 1".into(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(Error::InvalidRequest(
                "backoffMultiplier must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(Error::InvalidRequest(
                "jitterFraction must be in [0, 1]".into(),
            ));
        }
        if self.api_timeout_secs == 0 {
            return Err(Error::InvalidRequest(
                "apiTimeoutSecs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
