// Shared domain model for the courier forwarding middleware.
// Tenant configuration, the error taxonomy, and outcome records live here so
// the registries and the service agree on one vocabulary.
pub mod config;
pub mod error;
pub mod outcome;

pub use config::{AuthBody, AuthContentType, AuthReturnType, TenantConfig, TenantPriority};
pub use error::Error;
pub use outcome::{OutcomeRecord, OutcomeResult};

/// Message header carrying the tenant id, as set by the upstream producers.
pub const TENANT_HEADER: &str = "CBUSINESSUNIT";

/// Fallback profile used for tenants with no stored configuration.
pub const DEFAULT_TENANT: &str = "DEFAULT";

/// Per-tenant durable queue name. The exact shape is relied on by broker
/// bindings and operator tooling.
pub fn tenant_queue_name(tenant_id: &str) -> String {
    format!("partner.{tenant_id}.queue")
}

/// Route id for a tenant's main ingest loop, externalized for operators.
pub fn tenant_route_id(tenant_id: &str) -> String {
    format!("Partner:{tenant_id}:Main")
}

/// Logical worker name for worker `n` of a tenant pool.
pub fn worker_name(tenant_id: &str, n: usize) -> String {
    format!("Partner-{tenant_id}-Worker-{n}")
}

/// Unix epoch milliseconds, used for wire timestamps.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
