//! Integration tests for gct-import API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use gct_common::events::{EventBus, GctEvent};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::util::ServiceExt;

const ORG: &str = "org-1";

async fn create_test_app() -> (Router, SqlitePool, EventBus) {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    gct_common::db::init_schema(&pool)
        .await
        .expect("Failed to initialize database schema");

    let bus = EventBus::new(100);
    let state = gct_import::AppState::new(pool.clone(), bus.clone());
    (gct_import::build_router(state), pool, bus)
}

async fn send(app: &Router, method: &str, uri: &str, org: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
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

async fn record_session(pool: &SqlitePool, order: &str, ship: &[&str], ret: &[&str]) {
    sqlx::query(
        r#"
        INSERT INTO cylinder_scans (organization_id, order_number, customer_name, ship_cylinders, return_cylinders, created_at)
        VALUES (?, ?, 'Acme Welding', ?, ?, '2024-05-01T10:00:00+00:00')
        "#,
    )
    .bind(ORG)
    .bind(order)
    .bind(serde_json::to_string(ship).unwrap())
    .bind(serde_json::to_string(ret).unwrap())
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _pool, _bus) = create_test_app().await;

    let (status, json) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "gct-import");
}

#[tokio::test]
async fn test_stage_requires_organization_and_known_kind() {
    let (app, _pool, _bus) = create_test_app().await;

    let (status, _) = send(&app, "POST", "/imports/invoice", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&app, "POST", "/imports/estimate", Some(ORG), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]["message"].as_str().unwrap().contains("estimate"));

    let (status, _) = send(&app, "POST", "/imports/invoice", Some(ORG), Some(json!("text"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_report_classifies_pending_imports() {
    let (app, pool, _bus) = create_test_app().await;
    record_session(&pool, "1001", &["A", "B"], &["C"]).await;
    record_session(&pool, "1002", &["D"], &[]).await;
    record_session(&pool, "3000", &["E"], &[]).await;

    let invoices = [
        json!({ "invoice_number": "1001", "customer_name": "Acme Welding", "date": "2024-05-02",
                "line_items": [{ "qty_out": 2 }, { "qty_out": -1 }] }),
        json!({ "invoice_number": "1002", "customer_name": "Blue Gas", "date": "2024-05-03",
                "line_items": [{ "qty_out": "3" }] }),
        json!({ "invoice_number": "1004", "customer_name": "Blue Gas", "date": "2024-05-01",
                "line_items": [{ "qty_out": 1 }] }),
    ];
    for invoice in invoices {
        let (status, _) = send(&app, "POST", "/imports/invoice", Some(ORG), Some(invoice)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, report) = send(&app, "GET", "/imports/report", Some(ORG), None).await;
    assert_eq!(status, StatusCode::OK);

    let statuses: Vec<(&str, &str)> = report["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| (e["order_number"].as_str().unwrap(), e["status"].as_str().unwrap()))
        .collect();
    assert_eq!(statuses, vec![("1002", "mismatch"), ("1001", "match"), ("1004", "no_scan")]);
    assert_eq!(report["unmatched_scans"][0]["order_number"], "3000");
    assert_eq!(report["summary"]["total"], 3);

    let (_, report) = send(&app, "GET", "/imports/report?search=blue", Some(ORG), None).await;
    assert_eq!(report["entries"].as_array().unwrap().len(), 2);

    // Other organizations see nothing
    let (_, report) = send(&app, "GET", "/imports/report", Some("org-2"), None).await;
    assert_eq!(report["entries"], json!([]));
    assert_eq!(report["unmatched_scans"], json!([]));
}

#[tokio::test]
async fn test_approve_then_second_approval_conflicts() {
    let (app, pool, bus) = create_test_app().await;
    let mut events = bus.subscribe();

    let (_, staged) = send(
        &app,
        "POST",
        "/imports/receipts",
        Some(ORG),
        Some(json!({ "sales_receipt_number": "SR-1", "customer_id": "C-1", "customer_name": "Acme Welding",
                     "line_items": [{ "product_code": "BCS68", "qty_out": 1, "amount": 12.5 }] })),
    )
    .await;
    let id = staged["id"].as_i64().unwrap();
    assert_eq!(staged["kind"], "receipt");

    let (status, json) = send(&app, "POST", &format!("/imports/receipt/{}/approve", id), Some(ORG), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["customer_id"], "C-1");
    assert_eq!(json["customer_created"], true);
    assert_eq!(json["line_items"], 1);

    match events.recv().await.unwrap() {
        GctEvent::ImportApproved { import_id, customer_id, .. } => {
            assert_eq!(import_id, id);
            assert_eq!(customer_id, "C-1");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let (status, json) = send(&app, "POST", &format!("/imports/receipt/{}/approve", id), Some(ORG), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "CONFLICT");

    let receipts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales_receipts WHERE organization_id = ?")
        .bind(ORG)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(receipts, 1);

    let (_, pending) = send(&app, "GET", "/imports/receipt", Some(ORG), None).await;
    assert_eq!(pending, json!([]));
}

#[tokio::test]
async fn test_reject_and_unknown_import() {
    let (app, _pool, _bus) = create_test_app().await;

    let (_, staged) = send(&app, "POST", "/imports/invoice", Some(ORG), Some(json!({ "invoice_number": "9" }))).await;
    let id = staged["id"].as_i64().unwrap();

    let (status, _) = send(&app, "POST", &format!("/imports/invoice/{}/reject", id), Some("org-2"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(&app, "POST", &format!("/imports/invoice/{}/reject", id), Some(ORG), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "rejected");

    let (status, _) = send(&app, "POST", &format!("/imports/invoice/{}/approve", id), Some(ORG), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
