//! Forwarder observability: tracing init, trace-context extraction for the
//! control API, and the Prometheus metrics listener.
//!
//! The metrics server participates in the service-wide graceful shutdown via
//! the same cancellation token as the ingest loops.
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_exporter_prometheus::PrometheusHandle;
use opentelemetry::global;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::KeyValue;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace as sdktrace;
use opentelemetry_sdk::Resource;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init_observability(service_name: &str) -> PrometheusHandle {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    // OTLP export is best-effort: without a collector the fmt layer alone
    // still gives structured logs.
    match build_tracer_provider(service_name) {
        Some(tracer) => {
            let _ = registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init();
        }
        None => {
            let _ = registry.try_init();
        }
    }

    PrometheusBuilder::new()
        .install_recorder()
        .expect("install metrics recorder")
}

fn build_tracer_provider(service_name: &str) -> Option<opentelemetry_sdk::trace::Tracer> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(
            sdktrace::Config::default().with_resource(Resource::new(otel_attributes(service_name))),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .ok()
}

// Resource attributes the forwarder deployment actually sets: identity plus
// environment/region labels used by the routing dashboards.
fn otel_attributes(service_name: &str) -> Vec<KeyValue> {
    let mut attrs = vec![KeyValue::new("service.name", service_name.to_string())];
    if let Ok(instance) =
        std::env::var("COURIER_SERVICE_INSTANCE_ID").or_else(|_| std::env::var("HOSTNAME"))
    {
        attrs.push(KeyValue::new("service.instance.id", instance));
    }
    for (attr, var) in [
        ("deployment.environment", "DEPLOYMENT_ENVIRONMENT"),
        ("cloud.region", "CLOUD_REGION"),
    ] {
        if let Ok(value) = std::env::var(var) {
            attrs.push(KeyValue::new(attr, value));
        }
    }
    attrs
}

/// Extracts the W3C trace context from inbound control API headers so HTTP
/// request spans parent onto the caller's trace. The propagator is stateless,
/// so no global registration is needed here.
pub fn trace_context_from_headers(headers: &axum::http::HeaderMap) -> opentelemetry::Context {
    TraceContextPropagator::new().extract(&HeaderExtractor(headers))
}

struct HeaderExtractor<'a>(&'a axum::http::HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Serves `/metrics` until the service cancellation token fires.
pub async fn serve_metrics(
    handle: PrometheusHandle,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
