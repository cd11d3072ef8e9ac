//! Integration tests for gct-scan API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use gct_common::config::MatchingConfig;
use gct_common::db::customers::insert_customer;
use gct_common::events::EventBus;
use gct_common::models::Customer;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::util::ServiceExt;

const ORG: &str = "org-1";

/// Test helper: create test app with in-memory database
async fn create_test_app() -> (Router, SqlitePool) {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    gct_common::db::init_schema(&pool)
        .await
        .expect("Failed to initialize database schema");

    let state = gct_scan::AppState::new(pool.clone(), EventBus::new(100), MatchingConfig::default());
    (gct_scan::build_router(state), pool)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    org: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(org) = org {
        builder = builder.header("X-Organization-Id", org);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn scan_body(barcode: &str, mode: &str) -> Value {
    json!({
        "bottle_barcode": barcode,
        "order_number": "SO-1001",
        "customer_name": "Acme Welding",
        "mode": mode,
        "timestamp": "2024-05-01T10:00:00Z"
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _pool) = create_test_app().await;

    let (status, json) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "gct-scan");
    assert_eq!(json["offline_queued"], 0);
}

#[tokio::test]
async fn test_missing_organization_is_bad_request() {
    let (app, _pool) = create_test_app().await;

    let (status, json) = send(&app, "GET", "/scans/order/SO-1001", None, None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_default_organization_used_without_header() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    gct_common::db::init_schema(&pool).await.unwrap();
    let state = gct_scan::AppState::new(pool.clone(), EventBus::new(100), MatchingConfig::default())
        .with_default_organization(Some("device-org".to_string()));
    let app = gct_scan::build_router(state);

    let (status, json) = send(&app, "POST", "/scans", None, Some(scan_body("123456789", "out"))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["scan"]["organization_id"], "device-org");
    assert_eq!(json["scan"]["mode"], "SHIP");
}

#[tokio::test]
async fn test_match_customer_against_stored_customers() {
    let (app, pool) = create_test_app().await;
    insert_customer(
        &pool,
        ORG,
        &Customer::new("800005BE-1578330321A", "Acme Welding").with_barcode("%800005BE-1578330321A"),
    )
    .await
    .unwrap();
    insert_customer(&pool, ORG, &Customer::new("80000C0A-1744057121A", "Blue Gas"))
        .await
        .unwrap();

    let (status, json) = send(
        &app,
        "POST",
        "/match/customer",
        Some(ORG),
        Some(json!({ "scanned": "*%800005be-1578330321A*" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "matched");
    assert_eq!(json["result"]["customer"]["CustomerListID"], "800005BE-1578330321A");
    assert_eq!(json["result"]["score"], 100);
    assert_eq!(json["result"]["ambiguous"], false);

    // Other organizations see none of these customers
    let (_, json) = send(
        &app,
        "POST",
        "/match/customer",
        Some("org-2"),
        Some(json!({ "scanned": "800005BE-1578330321A" })),
    )
    .await;
    assert_eq!(json["outcome"], "suggestions");
    assert_eq!(json["result"], json!([]));
}

#[tokio::test]
async fn test_match_customer_rejects_unusable_scan() {
    let (app, _pool) = create_test_app().await;

    let (status, json) = send(
        &app,
        "POST",
        "/match/customer",
        Some(ORG),
        Some(json!({ "scanned": " *%* ", "customers": [] })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_match_ocr_extracts_code_and_names() {
    let (app, pool) = create_test_app().await;
    insert_customer(&pool, ORG, &Customer::new("800006B3-1611180703A", "Northside Fabrication"))
        .await
        .unwrap();

    let text = "SALES RECEIPT\nNorthside Fabrication\n%800006b3-1611180703A\n12345";
    let (status, json) = send(&app, "POST", "/match/ocr", Some(ORG), Some(json!({ "text": text }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["receipt_barcode"], "800006B3-1611180703A");
    assert!(json["possible_names"]
        .as_array()
        .unwrap()
        .contains(&json!("Northside Fabrication")));
    assert_eq!(json["outcome"]["outcome"], "matched");
}

#[tokio::test]
async fn test_scan_lifecycle() {
    let (app, _pool) = create_test_app().await;

    let (status, first) = send(&app, "POST", "/scans", Some(ORG), Some(scan_body("123456789", "SHIP"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["duplicate"], false);

    let (status, replay) = send(&app, "POST", "/scans", Some(ORG), Some(scan_body("123456789", "ship"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["duplicate"], true);
    assert_eq!(replay["scan"]["id"], first["scan"]["id"]);

    let id = first["scan"]["id"].as_i64().unwrap();
    let (status, _) = send(&app, "POST", &format!("/scans/{}/read", id), Some("org-2"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", &format!("/scans/{}/read", id), Some(ORG), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, scans) = send(&app, "GET", "/scans/order/SO-1001", Some(ORG), None).await;
    assert_eq!(status, StatusCode::OK);
    let scans = scans.as_array().unwrap();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0]["read"], true);
}

#[tokio::test]
async fn test_invalid_scan_is_bad_request() {
    let (app, _pool) = create_test_app().await;

    let (status, json) = send(&app, "POST", "/scans", Some(ORG), Some(scan_body("12/34", "SHIP"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]["message"].as_str().unwrap().contains("invalid characters"));
}

#[tokio::test]
async fn test_scan_batch() {
    let (app, _pool) = create_test_app().await;

    let body = json!({
        "scans": [
            scan_body("111111111", "SHIP"),
            scan_body("111111111", "SHIP"),
            scan_body("222222222", "in"),
        ]
    });
    let (status, json) = send(&app, "POST", "/scans/batch", Some(ORG), Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["inserted"], 2);
    assert_eq!(json["duplicates"], 1);
}

#[tokio::test]
async fn test_offline_queue_and_sync() {
    let (app, pool) = create_test_app().await;

    let (status, json) = send(
        &app,
        "POST",
        "/offline/scans",
        Some(ORG),
        Some(json!({ "bottle_barcode": "123456789", "mode": "RETURN", "order_number": "SO-9" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queued"], true);
    assert_eq!(json["queue_length"], 1);

    let (_, json) = send(&app, "GET", "/offline/status", None, None).await;
    assert_eq!(json["queued"], 1);
    assert_eq!(json["in_progress"], false);
    assert_eq!(json["connected"], true);
    assert_eq!(json["last_sync_time"], Value::Null);

    let (status, json) = send(&app, "POST", "/offline/sync", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["synced_items"], 1);

    let (_, json) = send(&app, "GET", "/offline/status", None, None).await;
    assert_eq!(json["queued"], 0);
    assert!(json["last_sync_time"].is_string());

    let stored: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bottle_scans WHERE organization_id = ? AND mode = 'RETURN'",
    )
    .bind(ORG)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(stored, 1);
}

#[tokio::test]
async fn test_camera_scans_are_format_checked_and_debounced() {
    let (app, _pool) = create_test_app().await;
    let camera = |barcode: &str| json!({ "bottle_barcode": barcode, "mode": "SHIP", "source": "camera" });

    let (status, json) = send(&app, "POST", "/offline/scans", Some(ORG), Some(camera("%800006B3-1611180703A"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queued"], true);

    let (status, json) = send(&app, "POST", "/offline/scans", Some(ORG), Some(camera("%800006B3-1611180703A"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queued"], false);
    assert_eq!(json["debounced"], true);
    assert_eq!(json["queue_length"], 1);

    let (status, _) = send(&app, "POST", "/offline/scans", Some(ORG), Some(camera("HELLO"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_recover_uses_organization_cylinders() {
    let (app, pool) = create_test_app().await;
    sqlx::query("INSERT INTO cylinders (organization_id, barcode_number) VALUES (?, 'CYL-AAAA-0001')")
        .bind(ORG)
        .execute(&pool)
        .await
        .unwrap();

    let (status, json) = send(&app, "POST", "/recover", Some(ORG), Some(json!({ "barcode": "cyl-aaaa-0O1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["method"], "fuzzy");
    assert_eq!(json["reconstructed"], "CYL-AAAA-0001");

    let (_, json) = send(&app, "POST", "/recover", Some("org-2"), Some(json!({ "barcode": "cyl-aaaa-0O1" }))).await;
    assert_eq!(json["success"], false);
}
