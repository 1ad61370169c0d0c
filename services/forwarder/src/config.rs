use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;

// Forwarder service configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    // Control API HTTP listener bind address.
    pub http_bind: SocketAddr,
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // Optional Elasticsearch base URL for the config store and outcome sink.
    pub elasticsearch_url: Option<String>,
    // Bounded-staleness full reload interval for tenant configs.
    pub config_reload_interval_ms: u64,
    // Drain window when replacing or removing a tenant route.
    pub route_drain_timeout_ms: u64,
    // Drain window applied to every pool on process shutdown.
    pub shutdown_grace_ms: u64,
    // Credential expiry safety margin.
    pub credential_safety_margin_ms: u64,
}

const DEFAULT_FORWARDER_CONFIG_PATH: &str = "/usr/local/courier/config.yml";
const DEFAULT_CONFIG_RELOAD_INTERVAL_MS: u64 = 300_000;
const DEFAULT_ROUTE_DRAIN_TIMEOUT_MS: u64 = 2000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 30_000;
const DEFAULT_CREDENTIAL_SAFETY_MARGIN_MS: u64 = 30_000;

#[derive(Debug, Deserialize)]
struct ForwarderConfigOverride {
    http_bind: Option<String>,
    metrics_bind: Option<String>,
    elasticsearch_url: Option<String>,
    config_reload_interval_ms: Option<u64>,
    route_drain_timeout_ms: Option<u64>,
    shutdown_grace_ms: Option<u64>,
    credential_safety_margin_ms: Option<u64>,
}

impl ForwarderConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let http_bind = std::env::var("COURIER_HTTP_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse COURIER_HTTP_BIND")?;
        let metrics_bind = std::env::var("COURIER_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse COURIER_METRICS_BIND")?;
        let elasticsearch_url = std::env::var("COURIER_ES_URL").ok();
        // Reload every 300s by default; webhooks are the fast path, this is
        // the safety net.
        let config_reload_interval_ms = std::env::var("COURIER_CONFIG_RELOAD_INTERVAL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_CONFIG_RELOAD_INTERVAL_MS);
        let route_drain_timeout_ms = std::env::var("COURIER_ROUTE_DRAIN_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_ROUTE_DRAIN_TIMEOUT_MS);
        let shutdown_grace_ms = std::env::var("COURIER_SHUTDOWN_GRACE_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS);
        let credential_safety_margin_ms = std::env::var("COURIER_CREDENTIAL_SAFETY_MARGIN_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CREDENTIAL_SAFETY_MARGIN_MS);
        Ok(Self {
            http_bind,
            metrics_bind,
            elasticsearch_url,
            config_reload_interval_ms,
            route_drain_timeout_ms,
            shutdown_grace_ms,
            credential_safety_margin_ms,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        let override_path = std::env::var("COURIER_CONFIG").ok();
        let config_path = override_path
            .clone()
            .unwrap_or_else(|| DEFAULT_FORWARDER_CONFIG_PATH.to_string());
        let contents = match fs::read_to_string(&config_path) {
            Ok(contents) => Some(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if override_path.is_some() {
                    return Err(err).with_context(|| format!("read COURIER_CONFIG: {config_path}"));
                }
                None
            }
            Err(err) => {
                if override_path.is_some() {
                    return Err(err).with_context(|| format!("read COURIER_CONFIG: {config_path}"));
                }
                return Err(err).with_context(|| format!("read forwarder config: {config_path}"));
            }
        };
        if let Some(contents) = contents {
            // YAML overrides allow ops-friendly config files.
            let override_cfg: ForwarderConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse forwarder config yaml")?;
            if let Some(value) = override_cfg.http_bind {
                config.http_bind = value.parse().with_context(|| "parse http_bind")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.elasticsearch_url {
                config.elasticsearch_url = Some(value);
            }
            if let Some(value) = override_cfg.config_reload_interval_ms {
                if value > 0 {
                    config.config_reload_interval_ms = value;
                }
            }
            if let Some(value) = override_cfg.route_drain_timeout_ms {
                if value > 0 {
                    config.route_drain_timeout_ms = value;
                }
            }
            if let Some(value) = override_cfg.shutdown_grace_ms {
                if value > 0 {
                    config.shutdown_grace_ms = value;
                }
            }
            if let Some(value) = override_cfg.credential_safety_margin_ms {
                config.credential_safety_margin_ms = value;
            }
        }
        Ok(config)
    }

    pub fn config_reload_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config_reload_interval_ms)
    }

    pub fn route_drain_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.route_drain_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn credential_safety_margin(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.credential_safety_margin_ms)
    }
}
