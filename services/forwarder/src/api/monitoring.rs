//! Monitoring endpoints (`/api/monitoring`).
//!
//! Read-only visibility into pools, breakers, and the credential cache, plus
//! the administrative breaker transitions. A thin dispatcher: input
//! validation, registry calls, uniform shaping.
use crate::api::error::{api_not_found, ApiError};
use crate::api::types::{ForceResponse, HealthResponse, PartnerDetails, PartnerOverview};
use crate::app::AppState;
use axum::extract::{Path, State};
use axum::Json;
use courier_breaker::{BreakerState, BreakerStats};
use courier_pool::PoolStats;
use std::collections::BTreeMap;

/// System-wide health rollup.
#[utoipa::path(
    get,
    path = "/api/monitoring/health",
    tag = "monitoring",
    responses((status = 200, description = "Health rollup", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pools = state.pools.all().await;
    let breakers = state.breakers.all().await;
    let healthy_breakers = breakers
        .values()
        .filter(|stats| stats.state == BreakerState::Closed)
        .count();
    Json(HealthResponse {
        status: "UP".to_string(),
        total_partners: pools.len(),
        thread_pools_healthy: pools.values().filter(|stats| !stats.shutting_down).count(),
        circuit_breakers_healthy: healthy_breakers,
        circuit_breakers_open: breakers.len() - healthy_breakers,
        cache_stats: state.credentials.stats().await,
        timestamp: courier_core::now_millis(),
    })
}

/// Pool stats for every tenant.
#[utoipa::path(
    get,
    path = "/api/monitoring/threadpools",
    tag = "monitoring",
    responses((status = 200, description = "Per-tenant pool stats"))
)]
pub async fn all_pools(State(state): State<AppState>) -> Json<BTreeMap<String, PoolStats>> {
    Json(state.pools.all().await)
}

/// Pool stats for one tenant.
#[utoipa::path(
    get,
    path = "/api/monitoring/threadpools/{businessUnit}",
    tag = "monitoring",
    params(("businessUnit" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Pool stats", body = PoolStats),
        (status = 404, description = "No pool for tenant", body = Envelope)
    )
)]
pub async fn pool_by_tenant(
    State(state): State<AppState>,
    Path(business_unit): Path<String>,
) -> Result<Json<PoolStats>, ApiError> {
    state
        .pools
        .stats(&business_unit)
        .await
        .map(Json)
        .ok_or_else(|| api_not_found("No thread pool for partner", Some(&business_unit)))
}

/// Breaker stats for every tenant.
#[utoipa::path(
    get,
    path = "/api/monitoring/circuitbreakers",
    tag = "monitoring",
    responses((status = 200, description = "Per-tenant breaker stats"))
)]
pub async fn all_breakers(State(state): State<AppState>) -> Json<BTreeMap<String, BreakerStats>> {
    Json(state.breakers.all().await)
}

/// Breaker stats for one tenant.
#[utoipa::path(
    get,
    path = "/api/monitoring/circuitbreakers/{businessUnit}",
    tag = "monitoring",
    params(("businessUnit" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Breaker stats", body = BreakerStats),
        (status = 404, description = "No breaker for tenant", body = Envelope)
    )
)]
pub async fn breaker_by_tenant(
    State(state): State<AppState>,
    Path(business_unit): Path<String>,
) -> Result<Json<BreakerStats>, ApiError> {
    state
        .breakers
        .stats(&business_unit)
        .await
        .map(Json)
        .ok_or_else(|| api_not_found("No circuit breaker for partner", Some(&business_unit)))
}

/// Combined per-tenant view across pools and breakers.
#[utoipa::path(
    get,
    path = "/api/monitoring/partners",
    tag = "monitoring",
    responses((status = 200, description = "Combined overview", body = PartnerOverview))
)]
pub async fn partner_overview(State(state): State<AppState>) -> Json<PartnerOverview> {
    let pools = state.pools.all().await;
    let breakers = state.breakers.all().await;
    let mut partners: BTreeMap<String, PartnerDetails> = BTreeMap::new();
    let tenants: std::collections::BTreeSet<String> =
        pools.keys().chain(breakers.keys()).cloned().collect();
    for tenant in tenants {
        partners.insert(
            tenant.clone(),
            combined_details(&tenant, pools.get(&tenant), breakers.get(&tenant)),
        );
    }
    Json(PartnerOverview {
        total_partners: partners.len(),
        partners,
        timestamp: courier_core::now_millis(),
    })
}

/// Combined view for one tenant.
#[utoipa::path(
    get,
    path = "/api/monitoring/partners/{businessUnit}",
    tag = "monitoring",
    params(("businessUnit" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Combined detail", body = PartnerDetails),
        (status = 404, description = "Tenant has no pool or breaker", body = Envelope)
    )
)]
pub async fn partner_by_tenant(
    State(state): State<AppState>,
    Path(business_unit): Path<String>,
) -> Result<Json<PartnerDetails>, ApiError> {
    let pool = state.pools.stats(&business_unit).await;
    let breaker = state.breakers.stats(&business_unit).await;
    if pool.is_none() && breaker.is_none() {
        return Err(api_not_found("Unknown partner", Some(&business_unit)));
    }
    Ok(Json(combined_details(
        &business_unit,
        pool.as_ref(),
        breaker.as_ref(),
    )))
}

/// Forces the tenant's breaker OPEN (emergency shedding).
#[utoipa::path(
    post,
    path = "/api/monitoring/circuitbreakers/{businessUnit}/force-open",
    tag = "monitoring",
    params(("businessUnit" = String, Path, description = "Tenant identifier")),
    responses((status = 200, description = "Breaker forced open", body = ForceResponse))
)]
pub async fn force_open(
    State(state): State<AppState>,
    Path(business_unit): Path<String>,
) -> Json<ForceResponse> {
    tracing::warn!(partner = %business_unit, "forcing circuit breaker OPEN");
    state.breakers.force_open(&business_unit).await;
    Json(ForceResponse {
        status: "SUCCESS".to_string(),
        message: format!("Circuit breaker forced OPEN for {business_unit}"),
        business_unit,
    })
}

/// Forces the tenant's breaker CLOSED (recovery).
#[utoipa::path(
    post,
    path = "/api/monitoring/circuitbreakers/{businessUnit}/force-closed",
    tag = "monitoring",
    params(("businessUnit" = String, Path, description = "Tenant identifier")),
    responses((status = 200, description = "Breaker forced closed", body = ForceResponse))
)]
pub async fn force_closed(
    State(state): State<AppState>,
    Path(business_unit): Path<String>,
) -> Json<ForceResponse> {
    tracing::info!(partner = %business_unit, "forcing circuit breaker CLOSED");
    state.breakers.force_closed(&business_unit).await;
    Json(ForceResponse {
        status: "SUCCESS".to_string(),
        message: format!("Circuit breaker forced CLOSED for {business_unit}"),
        business_unit,
    })
}

fn combined_details(
    tenant: &str,
    pool: Option<&PoolStats>,
    breaker: Option<&BreakerStats>,
) -> PartnerDetails {
    let thread_pool_healthy = pool.map(|stats| !stats.shutting_down).unwrap_or(false);
    let circuit_breaker_healthy = breaker
        .map(|stats| stats.state == BreakerState::Closed)
        // No breaker yet means no recorded failures.
        .unwrap_or(true);
    PartnerDetails {
        business_unit: tenant.to_string(),
        thread_pool: pool.cloned(),
        circuit_breaker: breaker.cloned(),
        thread_pool_healthy,
        circuit_breaker_healthy,
        overall_healthy: circuit_breaker_healthy,
        timestamp: courier_core::now_millis(),
    }
}
