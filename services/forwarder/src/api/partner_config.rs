//! Partner configuration endpoints (`/api/v1/partner-config`).
//!
//! # Purpose
//! Event-driven entry points for route reconciliation: the change webhook,
//! manual per-tenant and global refresh, and route/config inspection. These
//! replace scheduled-poll-only updates; the periodic reload stays on as the
//! safety net.
use crate::api::error::{api_bad_request, api_internal, from_error, ApiError, Envelope};
use crate::api::types::{
    ConfigChangeNotification, PartnerConfigView, RefreshAllResponse, RouteStatusResponse,
};
use crate::app::AppState;
use axum::extract::{Path, State};
use axum::Json;
use courier_core::Error;

/// Webhook called when a tenant's configuration changes in the store.
#[utoipa::path(
    post,
    path = "/api/v1/partner-config/webhook/config-changed",
    tag = "partner-config",
    request_body = ConfigChangeNotification,
    responses(
        (status = 200, description = "Notification applied", body = Envelope),
        (status = 400, description = "Invalid notification", body = Envelope),
        (status = 500, description = "Reconciliation failed", body = Envelope)
    )
)]
pub async fn config_changed_webhook(
    State(state): State<AppState>,
    Json(notification): Json<ConfigChangeNotification>,
) -> Result<Json<Envelope>, ApiError> {
    let partner_id = notification.partner_id.trim().to_string();
    if partner_id.is_empty() {
        return Err(api_bad_request("Partner ID is required", None));
    }
    tracing::info!(
        partner = %partner_id,
        change_type = %notification.change_type,
        source = notification.source.as_deref().unwrap_or("unknown"),
        "configuration change notification received"
    );
    match notification.change_type.to_uppercase().as_str() {
        "CREATED" | "UPDATED" => match state.routes.reconcile_tenant(&partner_id).await {
            Ok(_) => Ok(Json(Envelope::ok(
                format!("Configuration updated and route refreshed for partner: {partner_id}"),
                Some(&partner_id),
            ))),
            Err(Error::NotFound(_)) => Err(api_bad_request(
                "Configuration not found in config store",
                Some(&partner_id),
            )),
            Err(err) => Err(from_error(&err, Some(&partner_id))),
        },
        "DELETED" => match state.routes.remove_tenant(&partner_id).await {
            Ok(removed) => {
                if !removed {
                    tracing::warn!(partner = %partner_id, "no route found to remove");
                }
                Ok(Json(Envelope::ok(
                    format!("Configuration deleted and route removed for partner: {partner_id}"),
                    Some(&partner_id),
                )))
            }
            Err(err) => Err(api_internal(
                &format!("Failed to delete configuration for partner: {partner_id} - {err}"),
                Some(&partner_id),
            )),
        },
        other => Err(api_bad_request(
            &format!("Unknown change type: {other}"),
            Some(&partner_id),
        )),
    }
}

/// Manual per-tenant reconciliation.
#[utoipa::path(
    post,
    path = "/api/v1/partner-config/{partnerId}/refresh",
    tag = "partner-config",
    params(("partnerId" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Route refreshed", body = Envelope),
        (status = 400, description = "Partner configuration not found", body = Envelope)
    )
)]
pub async fn refresh_partner(
    State(state): State<AppState>,
    Path(partner_id): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    tracing::info!(partner = %partner_id, "manual route refresh requested");
    match state.routes.reconcile_tenant(&partner_id).await {
        Ok(_) => Ok(Json(Envelope::ok(
            format!("Route manually refreshed for partner: {partner_id}"),
            Some(&partner_id),
        ))),
        Err(Error::NotFound(_)) => Err(api_bad_request(
            "Partner configuration not found",
            Some(&partner_id),
        )),
        Err(err) => Err(from_error(&err, Some(&partner_id))),
    }
}

/// Reloads the config store and reconciles every tenant.
#[utoipa::path(
    post,
    path = "/api/v1/partner-config/refresh-all",
    tag = "partner-config",
    responses(
        (status = 200, description = "All routes refreshed", body = RefreshAllResponse),
        (status = 500, description = "Reload failed", body = Envelope)
    )
)]
pub async fn refresh_all(
    State(state): State<AppState>,
) -> Result<Json<RefreshAllResponse>, ApiError> {
    tracing::info!("manual refresh requested for all partner routes");
    let initial_route_count = state.routes.active_route_count().await;
    state
        .routes
        .reconcile_all()
        .await
        .map_err(|err| api_internal(&format!("Failed to refresh all routes: {err}"), None))?;
    let active_routes: Vec<String> = state.routes.active_routes().await.into_keys().collect();
    Ok(Json(RefreshAllResponse {
        success: true,
        message: "All partner routes refreshed successfully".to_string(),
        initial_route_count,
        final_route_count: active_routes.len(),
        active_routes,
        timestamp: courier_core::now_millis(),
    }))
}

/// Current route table.
#[utoipa::path(
    get,
    path = "/api/v1/partner-config/routes/status",
    tag = "partner-config",
    responses((status = 200, description = "Active routes", body = RouteStatusResponse))
)]
pub async fn routes_status(State(state): State<AppState>) -> Json<RouteStatusResponse> {
    let active_routes = state.routes.active_routes().await;
    Json(RouteStatusResponse {
        success: true,
        active_route_count: active_routes.len(),
        active_routes,
        timestamp: courier_core::now_millis(),
    })
}

/// Current configuration for one tenant plus whether it has a live route.
#[utoipa::path(
    get,
    path = "/api/v1/partner-config/{partnerId}",
    tag = "partner-config",
    params(("partnerId" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Stored configuration", body = PartnerConfigView),
        (status = 404, description = "No configuration stored", body = Envelope)
    )
)]
pub async fn get_partner(
    State(state): State<AppState>,
    Path(partner_id): Path<String>,
) -> Result<Json<PartnerConfigView>, ApiError> {
    let configuration = state
        .store
        .get(&partner_id)
        .await
        .map_err(|err| api_internal(&format!("Failed to get configuration: {err}"), Some(&partner_id)))?
        .ok_or_else(|| from_error(&Error::NotFound(partner_id.clone()), Some(&partner_id)))?;
    let has_active_route = state.routes.has_active_route(&partner_id).await;
    Ok(Json(PartnerConfigView {
        success: true,
        partner_id,
        configuration,
        has_active_route,
        timestamp: courier_core::now_millis(),
    }))
}
