use super::*;

#[tokio::test]
async fn test_download_streams_delimited_document() {
    let (app, _) = test_router(120);

    let response = app
        .oneshot(get("/api/v1/download?report=staff&records=120&target=txt"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );
    assert_eq!(
        response.headers().get("content-disposition").unwrap(),
        "attachment; filename=\"staff.txt\""
    );

    let text = body_text(response).await;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 121);
    assert!(lines[0].starts_with("Id\tEmployee Id\tName"));
    for (i, line) in lines[1..].iter().enumerate() {
        assert!(line.starts_with(&format!("{i}\t")), "line {i} out of order");
    }
}

#[tokio::test]
async fn test_download_uses_summary_count_when_records_omitted() {
    let (app, _) = test_router(30);

    let response = app
        .oneshot(get("/api/v1/download?report=staff"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await.lines().count(), 31);
}

#[tokio::test]
async fn test_download_pdf_with_custom_name() {
    let (app, _) = test_router(45);

    let response = app
        .oneshot(get(
            "/api/v1/download?report=staff&records=45&target=pdf&file_name=headcount",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/pdf"
    );
    assert_eq!(
        response.headers().get("content-disposition").unwrap(),
        "attachment; filename=\"headcount.pdf\""
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.starts_with(b"%PDF-1.4"));
    assert!(bytes.ends_with(b"%%EOF\n"));
}

#[tokio::test]
async fn test_download_rejects_unknown_target() {
    let (app, exporter) = test_router(10);
    let mut events = exporter.subscribe();

    let response = app
        .oneshot(get("/api/v1/download?report=staff&records=10&target=docx"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "unsupported_format");
    assert!(events.try_recv().is_err(), "no export should have started");
}

#[tokio::test]
async fn test_download_rejects_non_positive_records() {
    let (app, _) = test_router(10);

    let response = app
        .oneshot(get("/api/v1/download?report=staff&records=0"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "invalid_record_count");
}

#[tokio::test]
async fn test_download_rejects_missing_report() {
    let (app, _) = test_router(10);

    let response = app
        .oneshot(get("/api/v1/download?records=5"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "empty_report");
}

#[tokio::test]
async fn test_download_rejects_oversized_request() {
    let mut config = test_config(2, 100, DeliveryMode::Queue);
    config.pipeline.max_records = 100;
    let app = create_router(exporter_with(
        config,
        Arc::new(SyntheticDataSource::new(1_000, 1)),
    ));

    let response = app
        .oneshot(get("/api/v1/download?report=staff&records=500"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json = body_json(response).await;
    assert_eq!(json["error"]["details"]["max"], 100);
}

#[tokio::test]
async fn test_download_failure_truncates_body() {
    let app = create_router(exporter_with(
        test_config(1, 100, DeliveryMode::Queue),
        Arc::new(ScriptedSource::new(300).fail_at(100)),
    ));

    let response = app
        .oneshot(get("/api/v1/download?report=staff&records=300"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await;
    assert!(body.is_err(), "body should end with an error");
}

#[tokio::test]
async fn test_report_summary() {
    let (app, _) = test_router(77);

    let response = app
        .oneshot(get("/api/v1/reports/staff/summary"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["totalRecords"], 77);
    assert_eq!(json["reportName"], "Report for: staff");
}

#[tokio::test]
async fn test_list_exports_shows_running_export() {
    let exporter = exporter_with(
        test_config(2, 100, DeliveryMode::Queue),
        Arc::new(ScriptedSource::new(400).with_delay(Duration::from_secs(5))),
    );
    let app = create_router(exporter.clone());

    let response = app
        .clone()
        .oneshot(get("/api/v1/download?report=staff&records=400&target=xls"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let listed = loop {
        let response = app.clone().oneshot(get("/api/v1/exports")).await.unwrap();
        let json = body_json(response).await;
        if !json.as_array().unwrap().is_empty() {
            break json;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert_eq!(listed[0]["file_name"], "staff.xls");
    assert_eq!(listed[0]["format"], "spreadsheet");
    let id = listed[0]["id"].as_u64().unwrap();

    let cancel = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/exports/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(cancel).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    exporter.shutdown().await.unwrap();
    assert!(exporter.active_exports().await.is_empty());
}

#[tokio::test]
async fn test_cancel_unknown_export_is_not_found() {
    let (app, _) = test_router(10);

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/v1/exports/4242")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_list_exports_empty() {
    let (app, _) = test_router(10);

    let response = app.oneshot(get("/api/v1/exports")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));
}
