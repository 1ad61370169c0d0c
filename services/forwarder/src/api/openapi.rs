//! OpenAPI document for the control API.
use crate::api;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Courier Forwarder Control API",
        description = "Tenant route reconciliation, runtime configuration, and monitoring"
    ),
    paths(
        api::partner_config::config_changed_webhook,
        api::partner_config::refresh_partner,
        api::partner_config::refresh_all,
        api::partner_config::routes_status,
        api::partner_config::get_partner,
        api::monitoring::health,
        api::monitoring::all_pools,
        api::monitoring::pool_by_tenant,
        api::monitoring::all_breakers,
        api::monitoring::breaker_by_tenant,
        api::monitoring::partner_overview,
        api::monitoring::partner_by_tenant,
        api::monitoring::force_open,
        api::monitoring::force_closed,
        api::config_admin::get_all,
        api::config_admin::get_one,
        api::config_admin::update_one,
        api::config_admin::create_one,
        api::config_admin::delete_one,
        api::config_admin::bulk_update,
    ),
    components(schemas(
        api::error::Envelope,
        api::types::ConfigChangeNotification,
        api::types::RouteStatusResponse,
        api::types::PartnerConfigView,
        api::types::RefreshAllResponse,
        api::types::HealthResponse,
        api::types::PartnerDetails,
        api::types::PartnerOverview,
        api::types::ForceResponse,
        api::types::BulkUpdateResponse,
        courier_core::TenantConfig,
        courier_core::AuthBody,
        courier_core::AuthContentType,
        courier_core::AuthReturnType,
        courier_core::TenantPriority,
        courier_pool::PoolStats,
        courier_breaker::BreakerStats,
        courier_breaker::BreakerState,
        courier_auth::CacheStats,
    )),
    tags(
        (name = "partner-config", description = "Route reconciliation and config inspection"),
        (name = "monitoring", description = "Pools, breakers, and health"),
        (name = "config", description = "Runtime configuration management")
    )
)]
pub struct ApiDoc;
