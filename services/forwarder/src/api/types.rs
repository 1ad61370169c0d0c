//! Request and response payloads for the control API.
//!
//! Field casing is lowerCamelCase for bit-exact compatibility with existing
//! clients of these endpoints.
use courier_auth::CacheStats;
use courier_breaker::BreakerStats;
use courier_core::TenantConfig;
use courier_pool::PoolStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Configuration change notification delivered by the config store's
/// webhook. `changeType` is validated by hand so unknown values produce the
/// documented envelope instead of a generic deserialization error.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChangeNotification {
    pub partner_id: String,
    pub change_type: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatusResponse {
    pub success: bool,
    pub active_route_count: usize,
    pub active_routes: BTreeMap<String, String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PartnerConfigView {
    pub success: bool,
    pub partner_id: String,
    pub configuration: TenantConfig,
    pub has_active_route: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshAllResponse {
    pub success: bool,
    pub message: String,
    pub initial_route_count: usize,
    pub final_route_count: usize,
    pub active_routes: Vec<String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub total_partners: usize,
    pub thread_pools_healthy: usize,
    pub circuit_breakers_healthy: usize,
    pub circuit_breakers_open: usize,
    pub cache_stats: CacheStats,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PartnerDetails {
    pub business_unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_pool: Option<PoolStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<BreakerStats>,
    pub thread_pool_healthy: bool,
    pub circuit_breaker_healthy: bool,
    pub overall_healthy: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PartnerOverview {
    pub partners: BTreeMap<String, PartnerDetails>,
    pub total_partners: usize,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForceResponse {
    pub status: String,
    pub message: String,
    pub business_unit: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateResponse {
    pub successes: BTreeMap<String, String>,
    pub errors: BTreeMap<String, String>,
    pub timestamp: u64,
}
