//! Shared helpers for worker HTTP tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use catalog_messaging::queue::InMemoryIntegrationEventQueue;
use catalog_test_support::{FixedClock, fixed_now};
use http_body_util::BodyExt;
use tower::ServiceExt;

use catalog_worker::routes;
use catalog_worker::state::AppState;

/// In-memory queue on a fixed clock.
pub fn test_queue() -> Arc<InMemoryIntegrationEventQueue> {
    Arc::new(InMemoryIntegrationEventQueue::new(Arc::new(FixedClock(
        fixed_now(),
    ))))
}

/// Builds the same router as `main.rs` over `queue`.
pub fn build_test_app(queue: Arc<InMemoryIntegrationEventQueue>) -> Router {
    Router::new()
        .merge(routes::health::router())
        .with_state(AppState::new(queue))
}

/// Sends a GET request and returns the status and parsed JSON body.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}
