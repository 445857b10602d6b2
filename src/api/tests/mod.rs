use super::*;
use crate::config::DeliveryMode;
use crate::source::SyntheticDataSource;
use crate::test_helpers::{ScriptedSource, test_config};
use crate::{Config, DataSource};
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use std::time::Duration;
use tower::ServiceExt;

mod exports;

fn exporter_with(config: Config, source: Arc<dyn DataSource>) -> Arc<ReportExporter> {
    Arc::new(ReportExporter::new(config, source).unwrap())
}

/// Router over a synthetic source holding `total` records
fn test_router(total: u64) -> (Router, Arc<ReportExporter>) {
    let exporter = exporter_with(
        test_config(3, 20, DeliveryMode::Queue),
        Arc::new(SyntheticDataSource::new(total, 5)),
    );
    (create_router(exporter.clone()), exporter)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let mut config = test_config(1, 100, DeliveryMode::Queue);
    // Port 0 = OS assigns a free port
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let exporter = exporter_with(config, Arc::new(SyntheticDataSource::new(10, 1)));

    let api_handle = tokio::spawn(start_api_server(exporter));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!api_handle.is_finished(), "server exited early");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let (app, _) = test_router(10);

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let mut config = test_config(1, 100, DeliveryMode::Queue);
    config.api.cors_enabled = false;
    let app = create_router(exporter_with(
        config,
        Arc::new(SyntheticDataSource::new(10, 1)),
    ));

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_specific_origin() {
    let mut config = test_config(1, 100, DeliveryMode::Queue);
    config.api.cors_origins = vec!["http://reports.example".to_string()];
    let app = create_router(exporter_with(
        config,
        Arc::new(SyntheticDataSource::new(10, 1)),
    ));

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://reports.example")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "http://reports.example"
    );
}

#[tokio::test]
async fn test_routes_are_versioned() {
    let (app, _) = test_router(10);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
