// Tenant isolation: one tenant's failures or saturation never starve a
// healthy neighbor's pool, breaker, or throughput.
mod common;

use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use common::{fast_tenant, harness, serve_stub, wait_for};
use courier_breaker::BreakerState;
use forwarder::broker::{Delivery, MessageBroker};
use forwarder::store::TenantConfigStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

async fn stub_endpoints(fail: bool) -> (String, String, tokio::sync::oneshot::Sender<()>, tokio::sync::oneshot::Sender<()>) {
    let status = if fail {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };
    let target = Router::new().route("/forward", post(move || async move { status }));
    let (target_addr, target_shutdown) = serve_stub(target).await;
    let token = Router::new().route(
        "/oauth/token",
        post(|| async { Json(serde_json::json!({ "access_token": "tok" })) }),
    );
    let (token_addr, token_shutdown) = serve_stub(token).await;
    (
        format!("http://{target_addr}/forward"),
        format!("http://{token_addr}/oauth/token"),
        target_shutdown,
        token_shutdown,
    )
}

#[tokio::test]
async fn failing_tenant_opens_its_breaker_and_leaves_neighbor_untouched() {
    let h = harness().await;

    let (a_api, a_auth, _g1, _g2) = stub_endpoints(false).await;
    let mut a_cfg = fast_tenant("A", 1);
    a_cfg.api_endpoint = a_api;
    a_cfg.auth_endpoint = a_auth;
    h.store.upsert(a_cfg).await.expect("seed A");

    let (b_api, b_auth, _g3, _g4) = stub_endpoints(true).await;
    let mut b_cfg = fast_tenant("B", 1);
    b_cfg.api_endpoint = b_api;
    b_cfg.auth_endpoint = b_auth;
    h.store.upsert(b_cfg).await.expect("seed B");

    for _ in 0..100 {
        let _ = h.processor.process("A", Delivery::for_tenant("A", Bytes::from("ok"))).await;
        let _ = h.processor.process("B", Delivery::for_tenant("B", Bytes::from("doomed"))).await;
    }

    let a_pool = h.pools.stats("A").await.expect("A pool");
    assert_eq!(a_pool.completed_count, 100);
    assert_eq!(
        h.breakers.stats("A").await.expect("A breaker").state,
        BreakerState::Closed
    );
    assert_eq!(
        h.breakers.stats("B").await.expect("B breaker").state,
        BreakerState::Open
    );
    // B's rejected calls never consumed pool capacity after the trip.
    let b_pool = h.pools.stats("B").await.expect("B pool");
    assert!(b_pool.completed_count < 100);
}

#[tokio::test]
async fn slow_tenant_does_not_delay_fast_tenant_routes() {
    let h = harness().await;

    // SLOW's endpoint holds every request for 200ms.
    let slow_target = Router::new().route(
        "/forward",
        post(|| async {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            axum::http::StatusCode::OK
        }),
    );
    let (slow_addr, _slow_shutdown) = serve_stub(slow_target).await;
    let token = Router::new().route(
        "/oauth/token",
        post(|| async { Json(serde_json::json!({ "access_token": "tok" })) }),
    );
    let (token_addr, _token_shutdown) = serve_stub(token).await;

    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);
    let fast_target = Router::new().route(
        "/forward",
        post(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                axum::http::StatusCode::OK
            }
        }),
    );
    let (fast_addr, _fast_shutdown) = serve_stub(fast_target).await;

    let mut slow_cfg = fast_tenant("SLOW", 1);
    slow_cfg.api_endpoint = format!("http://{slow_addr}/forward");
    slow_cfg.auth_endpoint = format!("http://{token_addr}/oauth/token");
    slow_cfg.core_workers = 1;
    slow_cfg.max_workers = 1;
    h.store.upsert(slow_cfg).await.expect("seed SLOW");

    let mut fast_cfg = fast_tenant("FAST", 1);
    fast_cfg.api_endpoint = format!("http://{fast_addr}/forward");
    fast_cfg.auth_endpoint = format!("http://{token_addr}/oauth/token");
    h.store.upsert(fast_cfg).await.expect("seed FAST");

    h.routes.reconcile_tenant("SLOW").await.expect("SLOW route");
    h.routes.reconcile_tenant("FAST").await.expect("FAST route");

    // Pile work onto SLOW, then deliver to FAST.
    for n in 0..10 {
        h.broker
            .publish(
                "partner.SLOW.queue",
                Delivery::for_tenant("SLOW", Bytes::from(format!("s-{n}"))),
            )
            .await
            .expect("publish slow");
    }
    for n in 0..5 {
        h.broker
            .publish(
                "partner.FAST.queue",
                Delivery::for_tenant("FAST", Bytes::from(format!("f-{n}"))),
            )
            .await
            .expect("publish fast");
    }

    // FAST finishes its five deliveries long before SLOW could clear ten
    // 200ms calls through a single worker.
    wait_for("fast tenant deliveries", || async {
        hits.load(Ordering::SeqCst) == 5
    })
    .await;
    let slow_pool = h.pools.stats("SLOW").await.expect("SLOW pool");
    assert!(slow_pool.completed_count < 10);
}

#[tokio::test]
async fn saturated_tenant_pool_runs_overflow_on_submitter() {
    let h = harness().await;
    let mut cfg = fast_tenant("TINY", 1);
    cfg.core_workers = 1;
    cfg.max_workers = 1;
    cfg.queue_capacity = 1;
    h.store.upsert(cfg).await.expect("seed");

    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let mut submissions = Vec::new();
    for _ in 0..2 {
        let gate = Arc::clone(&gate);
        submissions.push(
            h.pools
                .submit("TINY", move |_| async move {
                    let _permit = gate
                        .acquire()
                        .await
                        .map_err(|_| courier_core::Error::Internal("gate closed".into()))?;
                    Ok::<_, courier_core::Error>(())
                })
                .await,
        );
    }
    wait_for("worker busy and queue full", || async {
        let stats = h.pools.stats("TINY").await.expect("stats");
        stats.active_count == 1 && stats.queue_depth == 1
    })
    .await;

    // Third submission executes synchronously on this task.
    let lane = Arc::new(std::sync::Mutex::new(String::new()));
    let seen = Arc::clone(&lane);
    let inline = h
        .pools
        .submit("TINY", move |worker| async move {
            *seen.lock().expect("lane lock") = worker;
            Ok::<_, courier_core::Error>(())
        })
        .await;
    assert_eq!(lane.lock().expect("lane lock").as_str(), "Partner-TINY-Caller");
    inline.await.expect("inline task");

    gate.add_permits(2);
    for submission in submissions {
        submission.await.expect("gated task");
    }
    wait_for("all three tasks counted", || async {
        h.pools.stats("TINY").await.expect("stats").completed_count == 3
    })
    .await;
}
