// All functions in this module are shared test helpers. Not every test binary
// uses every helper, so we suppress dead_code warnings at the item level.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use http_body_util::BodyExt;
use lookout_api::auth::jwt::{sign_token, JwtVerifier};
use lookout_api::config::ServerConfig;
use lookout_api::router::build_app_router;
use lookout_api::state::AppState;
use lookout_core::{Error, ScanResult, UserId};
use lookout_provider::{ScanProvider, SubmitError, Submission};
use lookout_scanner::{Scanner, ScannerConfig};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_PRIVATE_KEY: &str = include_str!("../fixtures/jwt_test_key.pem");
pub const TEST_PUBLIC_KEY: &str = include_str!("../fixtures/jwt_test_key.pub.pem");

/// Provider stub for API tests. The API paths never reach the provider
/// (scans are executed by the worker), so any call is a test bug.
struct UnreachableProvider;

#[async_trait]
impl ScanProvider for UnreachableProvider {
    async fn submit(&self, _url: &str) -> Result<Submission, SubmitError> {
        unreachable!("API tests must not hit the provider");
    }

    async fn result(&self, _provider_scan_id: &str) -> Result<ScanResult, Error> {
        unreachable!("API tests must not hit the provider");
    }
}

/// Build a test `ServerConfig` with safe defaults and the test keypair.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        request_timeout_secs: 30,
        shutdown_timeout_secs: 10,
        cors_origins: Vec::new(),
        jwt_public_key_pem: TEST_PUBLIC_KEY.to_string(),
    }
}

/// Build the full application router with all middleware layers, so the
/// tests exercise the same stack production uses.
pub fn build_test_app(pool: PgPool) -> Router {
    let config = test_config();
    let scanner = Scanner::new(
        pool,
        Arc::new(UnreachableProvider),
        ScannerConfig {
            max_attempts: 5,
            result_cache_ttl: chrono::Duration::hours(1),
        },
    );
    let state = AppState {
        scanner,
        verifier: Arc::new(JwtVerifier::new(TEST_PUBLIC_KEY).unwrap()),
    };

    build_app_router(state, &config)
}

/// Mint a valid RS256 token for the given user.
pub fn token_for(user_id: UserId) -> String {
    sign_token(TEST_PRIVATE_KEY, user_id, chrono::Duration::hours(1)).unwrap()
}

/// Mint an already-expired token.
pub fn expired_token_for(user_id: UserId) -> String {
    sign_token(TEST_PRIVATE_KEY, user_id, chrono::Duration::hours(-1)).unwrap()
}

// ---------------------------------------------------------------------------
// Shared HTTP test helpers
// ---------------------------------------------------------------------------

/// Collect the response body into a `serde_json::Value`.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Send a request with an optional bearer token and optional JSON body.
pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> axum::response::Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }

    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str, token: &str) -> axum::response::Response {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn delete(app: Router, uri: &str, token: &str) -> axum::response::Response {
    send(app, Method::DELETE, uri, Some(token), None).await
}

pub async fn post_json(
    app: Router,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> axum::response::Response {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

/// Create a scan through the API and return its response body.
pub async fn create_scan(app: Router, token: &str, url: &str) -> serde_json::Value {
    let response = post_json(app, "/v1/scans", token, serde_json::json!({ "url": url })).await;
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    body_json(response).await
}

/// A fresh user id plus a valid token for it.
pub fn user() -> (UserId, String) {
    let user_id = Uuid::new_v4();
    let token = token_for(user_id);
    (user_id, token)
}
