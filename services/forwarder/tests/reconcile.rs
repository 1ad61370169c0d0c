// Route reconciliation through the control API: webhook-driven create,
// update, and delete, idempotent re-delivery, and full-reload semantics.
mod common;

use common::{fast_tenant, harness};
use forwarder::store::TenantConfigStore;
use serde_json::json;

#[tokio::test]
async fn webhook_created_then_deleted_updates_route_table() {
    let h = harness().await;
    h.store.upsert(fast_tenant("X", 1)).await.expect("seed");

    let response = h
        .client
        .post(format!(
            "{}/api/v1/partner-config/webhook/config-changed",
            h.base_url
        ))
        .json(&json!({ "partnerId": "X", "changeType": "CREATED" }))
        .send()
        .await
        .expect("webhook request");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("webhook body");
    assert_eq!(body["success"], true);
    assert_eq!(body["partnerId"], "X");

    let status: serde_json::Value = h
        .client
        .get(format!("{}/api/v1/partner-config/routes/status", h.base_url))
        .send()
        .await
        .expect("status request")
        .json()
        .await
        .expect("status body");
    assert_eq!(status["activeRouteCount"], 1);
    assert_eq!(status["activeRoutes"]["X"], "Partner:X:Main");

    let response = h
        .client
        .post(format!(
            "{}/api/v1/partner-config/webhook/config-changed",
            h.base_url
        ))
        .json(&json!({ "partnerId": "X", "changeType": "DELETED" }))
        .send()
        .await
        .expect("delete webhook");
    assert_eq!(response.status(), 200);

    let status: serde_json::Value = h
        .client
        .get(format!("{}/api/v1/partner-config/routes/status", h.base_url))
        .send()
        .await
        .expect("status request")
        .json()
        .await
        .expect("status body");
    assert_eq!(status["activeRouteCount"], 0);
    assert!(status["activeRoutes"].get("X").is_none());
}

#[tokio::test]
async fn repeated_notification_for_same_version_is_a_no_op() {
    let h = harness().await;
    h.store.upsert(fast_tenant("X", 7)).await.expect("seed");

    for _ in 0..3 {
        let response = h
            .client
            .post(format!(
                "{}/api/v1/partner-config/webhook/config-changed",
                h.base_url
            ))
            .json(&json!({ "partnerId": "X", "changeType": "UPDATED", "version": 7 }))
            .send()
            .await
            .expect("webhook request");
        assert_eq!(response.status(), 200);
    }
    let routes = h.routes.active_routes().await;
    assert_eq!(routes.len(), 1);
    assert_eq!(routes.get("X").map(String::as_str), Some("Partner:X:Main"));
}

#[tokio::test]
async fn version_change_replaces_the_route() {
    let h = harness().await;
    h.store.upsert(fast_tenant("X", 1)).await.expect("seed v1");
    h.routes.reconcile_tenant("X").await.expect("create");

    h.store.upsert(fast_tenant("X", 2)).await.expect("seed v2");
    let action = h.routes.reconcile_tenant("X").await.expect("replace");
    assert_eq!(action, forwarder::routes::ReconcileAction::Replaced);
    // Still exactly one route for the tenant.
    assert_eq!(h.routes.active_route_count().await, 1);

    let action = h.routes.reconcile_tenant("X").await.expect("unchanged");
    assert_eq!(action, forwarder::routes::ReconcileAction::Unchanged);
}

#[tokio::test]
async fn invalid_notifications_are_rejected() {
    let h = harness().await;

    // Blank partner id.
    let response = h
        .client
        .post(format!(
            "{}/api/v1/partner-config/webhook/config-changed",
            h.base_url
        ))
        .json(&json!({ "partnerId": "  ", "changeType": "CREATED" }))
        .send()
        .await
        .expect("blank partner");
    assert_eq!(response.status(), 400);

    // Unknown change type.
    let response = h
        .client
        .post(format!(
            "{}/api/v1/partner-config/webhook/config-changed",
            h.base_url
        ))
        .json(&json!({ "partnerId": "X", "changeType": "RENAMED" }))
        .send()
        .await
        .expect("unknown change type");
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.expect("body");
    assert_eq!(body["success"], false);
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("Unknown change type"));

    // CREATED for a tenant the store has never seen.
    let response = h
        .client
        .post(format!(
            "{}/api/v1/partner-config/webhook/config-changed",
            h.base_url
        ))
        .json(&json!({ "partnerId": "GHOST", "changeType": "CREATED" }))
        .send()
        .await
        .expect("unknown tenant");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn refresh_all_creates_and_retires_routes() {
    let h = harness().await;
    h.store.upsert(fast_tenant("A", 1)).await.expect("seed A");
    h.store.upsert(fast_tenant("B", 1)).await.expect("seed B");

    let response = h
        .client
        .post(format!("{}/api/v1/partner-config/refresh-all", h.base_url))
        .send()
        .await
        .expect("refresh-all");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("body");
    assert_eq!(body["success"], true);
    assert_eq!(body["finalRouteCount"], 2);

    // B disappears from the store; the next reload retires its route.
    h.store.remove("B").await.expect("remove B");
    let response = h
        .client
        .post(format!("{}/api/v1/partner-config/refresh-all", h.base_url))
        .send()
        .await
        .expect("refresh-all again");
    assert_eq!(response.status(), 200);
    let routes = h.routes.active_routes().await;
    assert!(routes.contains_key("A"));
    assert!(!routes.contains_key("B"));
    // The DEFAULT profile never gets a route of its own.
    assert!(!routes.contains_key("DEFAULT"));
}

#[tokio::test]
async fn manual_refresh_and_config_view() {
    let h = harness().await;
    h.store.upsert(fast_tenant("X", 3)).await.expect("seed");

    let response = h
        .client
        .post(format!("{}/api/v1/partner-config/X/refresh", h.base_url))
        .send()
        .await
        .expect("refresh");
    assert_eq!(response.status(), 200);

    let view: serde_json::Value = h
        .client
        .get(format!("{}/api/v1/partner-config/X", h.base_url))
        .send()
        .await
        .expect("get config")
        .json()
        .await
        .expect("config body");
    assert_eq!(view["success"], true);
    assert_eq!(view["partnerId"], "X");
    assert_eq!(view["hasActiveRoute"], true);
    assert_eq!(view["configuration"]["version"], 3);

    // Unknown tenants refresh to 400, read to 404.
    let response = h
        .client
        .post(format!("{}/api/v1/partner-config/GHOST/refresh", h.base_url))
        .send()
        .await
        .expect("refresh ghost");
    assert_eq!(response.status(), 400);
    let response = h
        .client
        .get(format!("{}/api/v1/partner-config/GHOST", h.base_url))
        .send()
        .await
        .expect("get ghost");
    assert_eq!(response.status(), 404);
}
