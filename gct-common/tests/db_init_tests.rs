//! Tests for database initialization
//!
//! Covers first-run creation, reopening an existing file, and the scan dedup index.

use gct_common::db::init_database;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("gct.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("gct.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query("INSERT INTO settings (key, value) VALUES ('probe', '1')")
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await.unwrap();
    let value: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'probe'")
        .fetch_one(&pool2)
        .await
        .unwrap();

    assert_eq!(value, "1", "Existing data should survive re-initialization");
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("gct.db")).await.unwrap();

    for table in [
        "settings",
        "customers",
        "cylinders",
        "bottle_scans",
        "cylinder_scans",
        "imported_invoices",
        "imported_sales_receipts",
        "invoices",
        "invoice_line_items",
        "sales_receipts",
        "sales_receipt_line_items",
        "offline_scans",
    ] {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1, "table {} missing", table);
    }
}

#[tokio::test]
async fn test_duplicate_scan_is_ignored_by_dedup_index() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("gct.db")).await.unwrap();

    for _ in 0..2 {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO bottle_scans
                (organization_id, bottle_barcode, order_number, mode, timestamp, created_at)
            VALUES ('org-1', '123456789', NULL, 'SHIP', '2024-05-01T10:00:00+00:00', '2024-05-01T10:00:00+00:00')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bottle_scans")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
