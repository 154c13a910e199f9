//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::PgPool;
use tasktrail_core::event::TracingEventDispatcher;
use tasktrail_core::retry::RetryPolicy;
use tasktrail_core::unit_of_work::UnitOfWorkFactory;
use tasktrail_test_support::InMemoryPermissionCache;
use tower::ServiceExt;

use tasktrail_api::routes;
use tasktrail_api::state::AppState;

/// A well-formed inbound trace context.
pub const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

/// Build the full app router over the real `PostgreSQL` repositories with an
/// in-process permission cache. Uses the same route structure as `main.rs`.
pub fn build_test_app(pool: PgPool) -> Router {
    let uow_factory = UnitOfWorkFactory::new(
        RetryPolicy::immediate(1),
        Arc::new(TracingEventDispatcher),
        Duration::from_secs(30),
    );
    let app_state = AppState::with_postgres(
        &pool,
        Arc::new(InMemoryPermissionCache::default()),
        "it",
        100,
        uow_factory,
    );

    routes::router().with_state(app_state)
}

/// A response decoded as JSON, with its headers.
pub struct JsonResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: serde_json::Value,
}

/// Send a request as `user_id` (a user) and decode the response.
pub async fn send_as(
    app: Router,
    method: &str,
    uri: &str,
    user_id: &str,
    body: Option<&serde_json::Value>,
) -> JsonResponse {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("traceparent", TRACEPARENT)
        .header("x-user-type", "user")
        .header("x-user-id", user_id);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null);

    JsonResponse {
        status,
        headers,
        json,
    }
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}
