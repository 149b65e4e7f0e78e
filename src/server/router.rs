use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use super::state::GatewayState;
use super::upload::upload_handler;
use crate::dispatch::DispatchReply;
use crate::errors::GatewayError;
use crate::metrics;

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route(
            "/api/invoke",
            post(invoke_handler).fallback(method_not_allowed_handler),
        )
        .route(
            "/api/operations",
            get(list_handler).fallback(method_not_allowed_handler),
        )
        .route(
            "/api/media",
            post(upload_handler).fallback(method_not_allowed_handler),
        )
        .route("/health", get(health_handler))
        .route("/livez", get(live_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_endpoint))
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

#[derive(Debug, Deserialize)]
struct InvokeRequest {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

pub(super) fn auth_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

/// Malformed request body: recovered into the envelope shape before the
/// dispatch state machine is entered.
pub(super) fn body_rejection(detail: String) -> DispatchReply {
    DispatchReply {
        status: StatusCode::BAD_REQUEST,
        envelope: GatewayError::Validation(detail).envelope(false),
        rate: None,
        www_authenticate: false,
    }
}

async fn invoke_handler(
    State(state): State<GatewayState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return body_rejection(rejection.body_text()).into_response(),
    };

    state
        .dispatcher
        .dispatch_invoke(
            client_addr.ip(),
            auth_header(&headers),
            &request.name,
            request.arguments.unwrap_or_else(|| json!({})),
        )
        .await
        .into_response()
}

async fn list_handler(
    State(state): State<GatewayState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    state
        .dispatcher
        .dispatch_list(client_addr.ip(), auth_header(&headers))
        .await
        .into_response()
}

async fn method_not_allowed_handler(State(state): State<GatewayState>) -> Response {
    state.dispatcher.method_not_allowed().into_response()
}

async fn health_handler(State(state): State<GatewayState>) -> Response {
    let healthy = state.health.is_live();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "live": state.health.is_live(),
            "ready": state.health.is_ready(),
            "last_error": state.health.last_error(),
        })),
    )
        .into_response()
}

async fn live_handler(State(state): State<GatewayState>) -> Response {
    if state.health.is_live() {
        (StatusCode::OK, "live").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not live").into_response()
    }
}

async fn ready_handler(State(state): State<GatewayState>) -> Response {
    if state.health.is_ready() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics_endpoint() -> Response {
    metrics::metrics_handler().await
}
