//! Runtime configuration endpoints (`/api/config`).
//!
//! Zero-downtime config management: create, update, and delete tenant
//! documents at runtime, singly or in bulk. Successful writes kick the route
//! manager so the new settings take effect without waiting for the periodic
//! reload. Per the existing clients' contract, write endpoints answer 200
//! with a success flag; bulk updates report per-tenant success/error maps.
use crate::api::error::{api_internal, api_not_found, from_error, ApiError, Envelope};
use crate::api::types::BulkUpdateResponse;
use crate::app::AppState;
use axum::extract::{Path, State};
use axum::Json;
use courier_core::{Error, TenantConfig};
use std::collections::{BTreeMap, HashMap};

/// All stored tenant configurations.
#[utoipa::path(
    get,
    path = "/api/config/partners",
    tag = "config",
    responses((status = 200, description = "All stored configurations"))
)]
pub async fn get_all(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, TenantConfig>>, ApiError> {
    let configs = state
        .store
        .load_all()
        .await
        .map_err(|err| api_internal(&format!("Failed to load configurations: {err}"), None))?;
    Ok(Json(configs.into_iter().collect()))
}

/// One stored tenant configuration.
#[utoipa::path(
    get,
    path = "/api/config/partners/{businessUnit}",
    tag = "config",
    params(("businessUnit" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Stored configuration", body = TenantConfig),
        (status = 404, description = "Not stored", body = Envelope)
    )
)]
pub async fn get_one(
    State(state): State<AppState>,
    Path(business_unit): Path<String>,
) -> Result<Json<TenantConfig>, ApiError> {
    state
        .store
        .get(&business_unit)
        .await
        .map_err(|err| api_internal(&format!("Failed to get configuration: {err}"), Some(&business_unit)))?
        .map(Json)
        .ok_or_else(|| from_error(&Error::NotFound(business_unit.clone()), Some(&business_unit)))
}

/// Updates a tenant configuration at runtime.
#[utoipa::path(
    put,
    path = "/api/config/partners/{businessUnit}",
    tag = "config",
    params(("businessUnit" = String, Path, description = "Tenant identifier")),
    request_body = TenantConfig,
    responses((status = 200, description = "Update outcome", body = Envelope))
)]
pub async fn update_one(
    State(state): State<AppState>,
    Path(business_unit): Path<String>,
    Json(config): Json<TenantConfig>,
) -> Json<Envelope> {
    Json(apply_config(&state, &business_unit, config).await)
}

/// Creates a tenant configuration.
#[utoipa::path(
    post,
    path = "/api/config/partners/{businessUnit}",
    tag = "config",
    params(("businessUnit" = String, Path, description = "Tenant identifier")),
    request_body = TenantConfig,
    responses((status = 200, description = "Creation outcome", body = Envelope))
)]
pub async fn create_one(
    State(state): State<AppState>,
    Path(business_unit): Path<String>,
    Json(config): Json<TenantConfig>,
) -> Json<Envelope> {
    Json(apply_config(&state, &business_unit, config).await)
}

/// Deletes a tenant configuration and its route. Deletion failures answer
/// 500 with a descriptive message; deleting an unknown tenant is 404.
#[utoipa::path(
    delete,
    path = "/api/config/partners/{businessUnit}",
    tag = "config",
    params(("businessUnit" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Configuration deleted", body = Envelope),
        (status = 404, description = "Not stored", body = Envelope),
        (status = 500, description = "Deletion failed", body = Envelope)
    )
)]
pub async fn delete_one(
    State(state): State<AppState>,
    Path(business_unit): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    match state.store.remove(&business_unit).await {
        Ok(true) => {
            state
                .routes
                .remove_tenant(&business_unit)
                .await
                .map_err(|err| {
                    api_internal(&format!("Configuration deletion error: {err}"), None)
                })?;
            Ok(Json(Envelope::ok(
                format!("Configuration deleted successfully for {business_unit}"),
                None,
            )))
        }
        Ok(false) => Err(api_not_found(
            &format!("Configuration not found for {business_unit}"),
            None,
        )),
        Err(err) => Err(api_internal(
            &format!("Configuration deletion error: {err}"),
            None,
        )),
    }
}

/// Bulk configuration update: each tenant is validated and applied
/// independently; the response maps tenants to their outcome and the call
/// answers 200 even when some entries fail.
#[utoipa::path(
    put,
    path = "/api/config/partners/bulk",
    tag = "config",
    responses((status = 200, description = "Per-tenant outcome maps", body = BulkUpdateResponse))
)]
pub async fn bulk_update(
    State(state): State<AppState>,
    Json(configurations): Json<HashMap<String, TenantConfig>>,
) -> Json<BulkUpdateResponse> {
    tracing::info!(count = configurations.len(), "bulk configuration update requested");
    let mut response = BulkUpdateResponse {
        successes: BTreeMap::new(),
        errors: BTreeMap::new(),
        timestamp: courier_core::now_millis(),
    };
    for (business_unit, config) in configurations {
        let outcome = apply_config(&state, &business_unit, config).await;
        if outcome.success {
            response
                .successes
                .insert(business_unit, "Configuration updated successfully".to_string());
        } else {
            response.errors.insert(business_unit, outcome.message);
        }
    }
    tracing::info!(
        successes = response.successes.len(),
        errors = response.errors.len(),
        "bulk configuration update completed"
    );
    Json(response)
}

/// Validates and stores a config, then nudges reconciliation. The write
/// outcome is reported even if the route refresh lags behind.
async fn apply_config(state: &AppState, business_unit: &str, mut config: TenantConfig) -> Envelope {
    config.business_unit = business_unit.to_string();
    if let Err(err) = config.validate() {
        return Envelope::error(format!("Configuration error: {err}"), None);
    }
    if let Err(err) = state.store.upsert(config).await {
        return Envelope::error(format!("Configuration update error: {err}"), None);
    }
    if let Err(err) = state.routes.reconcile_tenant(business_unit).await {
        tracing::warn!(partner = %business_unit, error = %err, "route refresh after config write failed");
    }
    Envelope::ok(
        format!("Configuration updated successfully for {business_unit}"),
        None,
    )
}
