//! Two operators approving the same document at once
//!
//! Uses an on-disk database so the two approvals run on separate connections.

use gct_common::db::init_database;
use gct_common::models::ImportKind;
use gct_common::Error;
use gct_import::services::approval::{approve, stage_import};
use serde_json::json;

#[tokio::test]
async fn test_concurrent_approval_materializes_once() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("gct.db")).await.unwrap();

    let id = stage_import(
        &pool,
        "org-1",
        ImportKind::Invoice,
        &json!({
            "invoice_number": "1001",
            "customer_name": "Acme Welding",
            "line_items": [{ "product_code": "BCS68", "qty_out": 2, "amount": 30 }]
        }),
    )
    .await
    .unwrap();

    let (first, second) = tokio::join!(
        approve(&pool, "org-1", ImportKind::Invoice, id),
        approve(&pool, "org-1", ImportKind::Invoice, id),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results.iter().filter(|r| matches!(r, Err(Error::Conflict(_)))).count(),
        1
    );

    let invoices: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices")
        .fetch_one(&pool)
        .await
        .unwrap();
    let customers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(invoices, 1);
    assert_eq!(customers, 1);
}
