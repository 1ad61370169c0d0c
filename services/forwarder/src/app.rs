//! Control API HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! This module centralizes route composition to keep `main` small and
//! testable; integration tests mount the same router over in-memory
//! components.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::observability;
use crate::routes::RouteManager;
use crate::store::TenantConfigStore;
use axum::Router;
use courier_auth::CredentialCache;
use courier_breaker::BreakerRegistry;
use courier_pool::PoolRegistry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TenantConfigStore>,
    pub pools: Arc<PoolRegistry>,
    pub breakers: Arc<BreakerRegistry>,
    pub credentials: Arc<CredentialCache>,
    pub routes: Arc<RouteManager>,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route(
            "/api/v1/partner-config/webhook/config-changed",
            axum::routing::post(api::partner_config::config_changed_webhook),
        )
        .route(
            "/api/v1/partner-config/refresh-all",
            axum::routing::post(api::partner_config::refresh_all),
        )
        .route(
            "/api/v1/partner-config/routes/status",
            axum::routing::get(api::partner_config::routes_status),
        )
        .route(
            "/api/v1/partner-config/:partner_id/refresh",
            axum::routing::post(api::partner_config::refresh_partner),
        )
        .route(
            "/api/v1/partner-config/:partner_id",
            axum::routing::get(api::partner_config::get_partner),
        )
        .route(
            "/api/monitoring/health",
            axum::routing::get(api::monitoring::health),
        )
        .route(
            "/api/monitoring/threadpools",
            axum::routing::get(api::monitoring::all_pools),
        )
        .route(
            "/api/monitoring/threadpools/:business_unit",
            axum::routing::get(api::monitoring::pool_by_tenant),
        )
        .route(
            "/api/monitoring/circuitbreakers",
            axum::routing::get(api::monitoring::all_breakers),
        )
        .route(
            "/api/monitoring/circuitbreakers/:business_unit",
            axum::routing::get(api::monitoring::breaker_by_tenant),
        )
        .route(
            "/api/monitoring/circuitbreakers/:business_unit/force-open",
            axum::routing::post(api::monitoring::force_open),
        )
        .route(
            "/api/monitoring/circuitbreakers/:business_unit/force-closed",
            axum::routing::post(api::monitoring::force_closed),
        )
        .route(
            "/api/monitoring/partners",
            axum::routing::get(api::monitoring::partner_overview),
        )
        .route(
            "/api/monitoring/partners/:business_unit",
            axum::routing::get(api::monitoring::partner_by_tenant),
        )
        .route(
            "/api/config/partners",
            axum::routing::get(api::config_admin::get_all),
        )
        .route(
            "/api/config/partners/bulk",
            axum::routing::put(api::config_admin::bulk_update),
        )
        .route(
            "/api/config/partners/:business_unit",
            axum::routing::get(api::config_admin::get_one)
                .put(api::config_admin::update_one)
                .post(api::config_admin::create_one)
                .delete(api::config_admin::delete_one),
        )
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/api/openapi.json", ApiDoc::openapi()),
        )
        .layer(trace_layer)
        .with_state(state)
}
