use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use content_gateway::config::RateLimitSettings;
use content_gateway::content::MemoryContentStore;
use content_gateway::dispatch::Dispatcher;
use content_gateway::identity::{AccessGrants, DirectoryEntry, Identity, MemoryDirectory};
use content_gateway::rate_limit::RateLimiter;
use content_gateway::server::{build_router, GatewayState};

const READER_TOKEN: &str = "cpk_11111111111111111111111111111111";
const ADMIN_TOKEN: &str = "cpk_22222222222222222222222222222222";

fn entry(token: &str, username: &str, access: AccessGrants) -> DirectoryEntry {
    DirectoryEntry {
        token: token.to_string(),
        identity: Identity {
            username: username.to_string(),
            enabled: true,
            access,
        },
    }
}

fn build_app() -> Router {
    let directory = MemoryDirectory::new(vec![
        entry(
            READER_TOKEN,
            "reader",
            AccessGrants {
                read: true,
                ..Default::default()
            },
        ),
        entry(
            ADMIN_TOKEN,
            "admin",
            AccessGrants {
                admin: true,
                ..Default::default()
            },
        ),
    ]);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(directory),
        Arc::new(MemoryContentStore::new()),
        Arc::new(RateLimiter::new()),
        RateLimitSettings::default(),
        false,
    ));
    let state = GatewayState::new(dispatcher, 1024 * 1024);
    state.health.mark_live();
    state.health.mark_ready();
    build_router(state)
}

fn request(method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let mut request = builder.body(body).expect("request");
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 43210))));
    request
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

#[tokio::test]
async fn health_reports_live_and_ready() {
    let app = build_app();
    let response = app
        .oneshot(request(Method::GET, "/health", None, None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["live"], true);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn missing_credential_yields_generic_unauthorized_with_challenge() {
    let app = build_app();
    let response = app
        .oneshot(request(
            Method::POST,
            "/api/invoke",
            None,
            Some(json!({"name": "list_posts"})),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok()),
        Some("Bearer")
    );
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["message"], "Authentication required");
}

#[tokio::test]
async fn wrong_scheme_is_indistinguishable_from_missing_credential() {
    let app = build_app();
    let response = app
        .oneshot(request(
            Method::POST,
            "/api/invoke",
            Some("Token abc"),
            Some(json!({"name": "list_posts"})),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["message"], "Authentication required");
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn invoke_round_trip_carries_rate_limit_headers() {
    let app = build_app();
    let response = app
        .oneshot(request(
            Method::POST,
            "/api/invoke",
            Some(&bearer(ADMIN_TOKEN)),
            Some(json!({
                "name": "create_post",
                "arguments": {"slug": "hello", "title": "Hello", "content": "World"},
            })),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let limit = response
        .headers()
        .get("x-ratelimit-limit")
        .and_then(|v| v.to_str().ok())
        .expect("limit header");
    assert_eq!(limit, "100");
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["created"], true);
}

#[tokio::test]
async fn listing_omits_operations_beyond_the_callers_capabilities() {
    let app = build_app();
    let response = app
        .oneshot(request(
            Method::GET,
            "/api/operations",
            Some(&bearer(READER_TOKEN)),
            None,
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<&str> = body["data"]["operations"]
        .as_array()
        .expect("operations")
        .iter()
        .map(|op| op["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"list_posts"));
    assert!(names.contains(&"get_post"));
    assert!(!names.contains(&"create_post"));
    assert!(!names.contains(&"delete_post"));
}

#[tokio::test]
async fn disallowed_method_gets_the_envelope_not_a_bare_405() {
    let app = build_app();
    let response = app
        .oneshot(request(Method::GET, "/api/invoke", None, None))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "METHOD_NOT_ALLOWED");
}

#[tokio::test]
async fn unknown_operation_name_is_its_own_error() {
    let app = build_app();
    let response = app
        .oneshot(request(
            Method::POST,
            "/api/invoke",
            Some(&bearer(READER_TOKEN)),
            Some(json!({"name": "teleport_post", "arguments": {}})),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNKNOWN_OPERATION");
}

#[tokio::test]
async fn destructive_operation_without_confirm_is_rejected() {
    let app = build_app();
    app.clone()
        .oneshot(request(
            Method::POST,
            "/api/invoke",
            Some(&bearer(ADMIN_TOKEN)),
            Some(json!({
                "name": "create_post",
                "arguments": {"slug": "keep", "title": "t", "content": "c"},
            })),
        ))
        .await
        .expect("create");

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/invoke",
            Some(&bearer(ADMIN_TOKEN)),
            Some(json!({"name": "delete_post", "arguments": {"slug": "keep"}})),
        ))
        .await
        .expect("response");

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "CONFIRMATION_REQUIRED");
}

#[tokio::test]
async fn json_upload_reduces_to_the_upload_media_operation() {
    let app = build_app();
    app.clone()
        .oneshot(request(
            Method::POST,
            "/api/invoke",
            Some(&bearer(ADMIN_TOKEN)),
            Some(json!({
                "name": "create_post",
                "arguments": {"slug": "gallery", "title": "g", "content": "c"},
            })),
        ))
        .await
        .expect("create");

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/media",
            Some(&bearer(ADMIN_TOKEN)),
            Some(json!({
                "slug": "gallery",
                "filename": "pic.png",
                "content_base64": "cG5nYnl0ZXM=",
            })),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["path"], "media/gallery/pic.png");
    assert_eq!(body["data"]["bytes"], 8);
}

#[tokio::test]
async fn multipart_upload_reduces_to_the_same_shape() {
    let app = build_app();
    app.clone()
        .oneshot(request(
            Method::POST,
            "/api/invoke",
            Some(&bearer(ADMIN_TOKEN)),
            Some(json!({
                "name": "create_post",
                "arguments": {"slug": "photos", "title": "p", "content": "c"},
            })),
        ))
        .await
        .expect("create");

    let boundary = "GatewayTestBoundary";
    let multipart_body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"slug\"\r\n\r\n\
         photos\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"shot.jpg\"\r\n\
         Content-Type: image/jpeg\r\n\r\n\
         rawjpegbytes\r\n\
         --{boundary}--\r\n"
    );
    let mut upload = Request::builder()
        .method(Method::POST)
        .uri("/api/media")
        .header("authorization", bearer(ADMIN_TOKEN))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(multipart_body))
        .expect("request");
    upload
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 43210))));

    let response = app.oneshot(upload).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["path"], "media/photos/shot.jpg");
    assert_eq!(body["data"]["bytes"], 12);
}

#[tokio::test]
async fn forbidden_and_unknown_remain_distinct_over_http() {
    let app = build_app();
    let response = app
        .oneshot(request(
            Method::POST,
            "/api/invoke",
            Some(&bearer(READER_TOKEN)),
            Some(json!({
                "name": "delete_post",
                "arguments": {"slug": "whatever", "confirm": true},
            })),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}
