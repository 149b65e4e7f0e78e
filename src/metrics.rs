use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use lazy_static::lazy_static;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{core::Collector, Encoder, IntCounterVec, Registry, TextEncoder};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

lazy_static! {
    static ref AUTH_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "gateway_auth_attempts_total",
            "Authentication attempts by outcome kind"
        ),
        &["kind"]
    )
    .unwrap();
    static ref RATE_LIMITED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "gateway_rate_limited_total",
            "Requests rejected by a rate window, by scope"
        ),
        &["scope"]
    )
    .unwrap();
    static ref DISPATCH_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "gateway_dispatch_total",
            "Dispatched operation invocations by terminal outcome"
        ),
        &["outcome"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register gateway metric");
        }
    }
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        register(registry, AUTH_ATTEMPTS_TOTAL.clone());
        register(registry, RATE_LIMITED_TOTAL.clone());
        register(registry, DISPATCH_TOTAL.clone());
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn record_auth_attempt(kind: &str) {
    AUTH_ATTEMPTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_rate_limited(scope: &str) {
    RATE_LIMITED_TOTAL.with_label_values(&[scope]).inc();
}

pub fn record_dispatch(outcome: &str) {
    DISPATCH_TOTAL.with_label_values(&[outcome]).inc();
}

pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let format_type = encoder.format_type().to_string();
    let metric_families = global_registry().gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(?err, "failed to encode prometheus metrics");
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "metric encode error",
        )
            .into_response();
    }

    match (String::from_utf8(buffer), HeaderValue::from_str(&format_type)) {
        (Ok(body), Ok(content_type)) => {
            ([(axum::http::header::CONTENT_TYPE, content_type)], body).into_response()
        }
        (Err(err), _) => {
            error!(?err, "failed to convert prometheus metrics to utf8");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "metric encode error",
            )
                .into_response()
        }
        (_, Err(err)) => {
            error!(?err, "failed to build content-type header");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "metric encode error",
            )
                .into_response()
        }
    }
}
