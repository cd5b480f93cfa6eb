//! Integration tests for the health endpoint.

mod common;

use axum::http::StatusCode;
use catalog_messaging::integration_event::{IntegrationEvent, IntegrationEventName};
use catalog_messaging::queue::IntegrationEventQueue;
use catalog_test_support::fixed_now;
use serde_json::json;

#[tokio::test]
async fn test_health_returns_200_with_status_ok() {
    let app = common::build_test_app(common::test_queue());

    let (status, json) = common::get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["pending_integration_events"], 0);
}

#[tokio::test]
async fn test_health_reports_pending_integration_events() {
    // Arrange
    let queue = common::test_queue();
    queue
        .add(IntegrationEvent::new(
            IntegrationEventName::VideoAudioUploaded,
            json!({ "resource_id": "abc.trailer", "file_path": "videos/abc/trailer.mp4" }),
            fixed_now(),
        ))
        .await
        .unwrap();
    let app = common::build_test_app(queue);

    // Act
    let (status, json) = common::get_json(app, "/health").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["pending_integration_events"], 1);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let app = common::build_test_app(common::test_queue());

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/api/v1/nonexistent")
        .body(axum::body::Body::empty())
        .unwrap();

    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
