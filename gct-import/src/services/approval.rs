//! Staging and approval of imported documents
//!
//! Approval materializes a staged invoice or sales receipt into the normalized
//! tables. The `pending → approved|rejected` flip is the first write of its
//! transaction and is conditional on the row still being pending, so two
//! operators approving the same document cannot both succeed.

use crate::services::document::{as_number, as_text, Document};
use chrono::Utc;
use gct_common::customer_match::match_customer_record;
use gct_common::db::customers::{find_customer_by_list_id, insert_customer};
use gct_common::db::{get_setting_i64, retry_on_lock, DEFAULT_BUSY_TIMEOUT_MS};
use gct_common::models::{Customer, ImportKind, ImportStatus, ImportedDocument};
use gct_common::time::parse_rfc3339;
use gct_common::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

/// Prefix of generated `CustomerListID`s for customers created on approval
pub const GENERATED_CUSTOMER_PREFIX: &str = "80000448";

/// Result of a successful approval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalOutcome {
    pub import_id: i64,
    pub kind: ImportKind,
    pub customer_id: String,
    pub customer_created: bool,
    /// Row id in `invoices` / `sales_receipts`
    pub record_id: i64,
    pub line_items: usize,
    pub total_amount: f64,
    pub cylinders_assigned: u64,
}

/// Normalized tables a kind is materialized into
struct Target {
    header: &'static str,
    number_column: &'static str,
    items: &'static str,
    parent_column: &'static str,
}

fn target(kind: ImportKind) -> Target {
    match kind {
        ImportKind::Invoice => Target {
            header: "invoices",
            number_column: "invoice_number",
            items: "invoice_line_items",
            parent_column: "invoice_id",
        },
        ImportKind::Receipt => Target {
            header: "sales_receipts",
            number_column: "sales_receipt_number",
            items: "sales_receipt_line_items",
            parent_column: "sales_receipt_id",
        },
    }
}

async fn lock_wait_ms(pool: &SqlitePool) -> Result<u64> {
    let ms = get_setting_i64(pool, "max_lock_wait_ms", DEFAULT_BUSY_TIMEOUT_MS as i64).await?;
    Ok(ms.max(0) as u64)
}

// ============================================================================
// Staging
// ============================================================================

/// Stage an uploaded document for review; returns the staging row id
pub async fn stage_import(
    pool: &SqlitePool,
    organization_id: &str,
    kind: ImportKind,
    data: &Value,
) -> Result<i64> {
    if !data.is_object() {
        return Err(Error::InvalidInput(
            "Import data must be a JSON object".to_string(),
        ));
    }

    let sql = format!(
        "INSERT INTO {} (organization_id, data, status, uploaded_at) VALUES (?, ?, 'pending', ?)",
        kind.staging_table()
    );
    let result = sqlx::query(&sql)
        .bind(organization_id)
        .bind(serde_json::to_string(data)?)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

    let id = result.last_insert_rowid();
    info!(organization_id, kind = %kind, import_id = id, "Import staged");
    Ok(id)
}

/// Pending documents of one kind, oldest first
pub async fn list_pending(
    pool: &SqlitePool,
    organization_id: &str,
    kind: ImportKind,
) -> Result<Vec<ImportedDocument>> {
    let sql = format!(
        "SELECT id, data, uploaded_at FROM {} WHERE organization_id = ? AND status = 'pending' ORDER BY id",
        kind.staging_table()
    );
    let rows = sqlx::query(&sql).bind(organization_id).fetch_all(pool).await?;

    rows.iter()
        .map(|row| {
            let data: String = row.try_get("data")?;
            let uploaded_at: Option<String> = row.try_get("uploaded_at")?;
            Ok(ImportedDocument {
                id: row.try_get("id")?,
                kind,
                status: ImportStatus::Pending,
                data: serde_json::from_str(&data)?,
                uploaded_at: uploaded_at.as_deref().map(parse_rfc3339).transpose()?,
            })
        })
        .collect()
}

// ============================================================================
// Status transitions
// ============================================================================

/// Flip a pending row to `status`; NotFound / Conflict when that is not possible
async fn claim<'e, E>(
    executor: E,
    organization_id: &str,
    kind: ImportKind,
    import_id: i64,
    status: ImportStatus,
) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "UPDATE {} SET status = ?, reviewed_at = ? WHERE id = ? AND organization_id = ? AND status = 'pending'",
        kind.staging_table()
    );
    let result = sqlx::query(&sql)
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(import_id)
        .bind(organization_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Explain why a claim affected no row
async fn claim_failure<'e, E>(
    executor: E,
    organization_id: &str,
    kind: ImportKind,
    import_id: i64,
) -> Error
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT status FROM {} WHERE id = ? AND organization_id = ?",
        kind.staging_table()
    );
    let status: std::result::Result<Option<String>, sqlx::Error> = sqlx::query_scalar(&sql)
        .bind(import_id)
        .bind(organization_id)
        .fetch_optional(executor)
        .await;

    match status {
        Ok(Some(status)) => Error::Conflict(format!("Import {} {} is already {}", kind, import_id, status)),
        Ok(None) => Error::NotFound(format!("Import {} {} not found", kind, import_id)),
        Err(e) => Error::Database(e),
    }
}

/// Reject a pending document
pub async fn reject(
    pool: &SqlitePool,
    organization_id: &str,
    kind: ImportKind,
    import_id: i64,
) -> Result<()> {
    let max_wait_ms = lock_wait_ms(pool).await?;

    retry_on_lock("reject_import", max_wait_ms, || async {
        if claim(pool, organization_id, kind, import_id, ImportStatus::Rejected).await? {
            Ok(())
        } else {
            Err(claim_failure(pool, organization_id, kind, import_id).await)
        }
    })
    .await?;

    info!(organization_id, kind = %kind, import_id, "Import rejected");
    Ok(())
}

// ============================================================================
// Approval
// ============================================================================

async fn customers_of(tx: &mut Transaction<'_, Sqlite>, organization_id: &str) -> Result<Vec<Customer>> {
    let rows = sqlx::query(
        "SELECT customer_list_id, name, barcode FROM customers WHERE organization_id = ? ORDER BY id",
    )
    .bind(organization_id)
    .fetch_all(&mut **tx)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(Customer {
                customer_list_id: row.try_get("customer_list_id")?,
                name: row.try_get("name")?,
                barcode: row.try_get("barcode")?,
            })
        })
        .collect()
}

/// Barcode printed for a generated customer: `*%<id>*`, lowercase, no whitespace
pub fn generated_customer_barcode(customer_list_id: &str) -> String {
    let compact: String = customer_list_id
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    format!("*%{}*", compact)
}

/// Find the document's customer, creating it when nothing matches
///
/// Lookup order: `CustomerListID`, case-insensitive name, then the looser
/// import-time record match. Returns the customer and whether it was created.
async fn resolve_customer(
    tx: &mut Transaction<'_, Sqlite>,
    organization_id: &str,
    doc: &Document<'_>,
) -> Result<(Customer, bool)> {
    let customer_id = doc.customer_id();
    let customer_name = doc.customer_name();

    if let Some(id) = customer_id.as_deref() {
        if let Some(found) = find_customer_by_list_id(&mut **tx, organization_id, id).await? {
            return Ok((found, false));
        }
    }

    if let Some(name) = customer_name.as_deref() {
        let row = sqlx::query(
            r#"
            SELECT customer_list_id, name, barcode FROM customers
            WHERE organization_id = ? AND name = ? COLLATE NOCASE
            ORDER BY id LIMIT 1
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(row) = row {
            let found = Customer {
                customer_list_id: row.try_get("customer_list_id")?,
                name: row.try_get("name")?,
                barcode: row.try_get("barcode")?,
            };
            return Ok((found, false));
        }
    }

    let existing = customers_of(tx, organization_id).await?;
    let barcode = doc.text("customer_barcode");
    if let Some(found) = match_customer_record(
        customer_id.as_deref(),
        customer_name.as_deref(),
        barcode.as_deref(),
        &existing,
    ) {
        debug!(
            organization_id,
            customer_list_id = %found.customer_list_id,
            "Import customer resolved by record match"
        );
        return Ok((found.clone(), false));
    }

    let name = customer_name.ok_or_else(|| {
        Error::InvalidInput("Customer name is required to create a customer".to_string())
    })?;
    let list_id = customer_id.unwrap_or_else(|| {
        format!("{}-{}S", GENERATED_CUSTOMER_PREFIX, Utc::now().timestamp_millis())
    });
    let customer = Customer::new(list_id.clone(), name).with_barcode(generated_customer_barcode(&list_id));
    insert_customer(&mut **tx, organization_id, &customer).await?;

    info!(
        organization_id,
        customer_list_id = %customer.customer_list_id,
        name = %customer.name,
        "Customer created from import"
    );
    Ok((customer, true))
}

/// Rows to materialize; a document without line items but with a product code
/// is its own single line
fn materialized_rows<'a>(doc: &Document<'a>) -> Vec<&'a Value> {
    let items = doc.line_items();
    if items.is_empty() {
        if doc.data().get("product_code").is_some() {
            return vec![doc.data()];
        }
        return Vec::new();
    }
    items.iter().collect()
}

async fn insert_record(
    tx: &mut Transaction<'_, Sqlite>,
    organization_id: &str,
    import_id: i64,
    doc: &Document<'_>,
    customer_id: &str,
) -> Result<(i64, usize, f64)> {
    let target = target(doc.kind());
    let rows = materialized_rows(doc);

    let total_amount = if rows.is_empty() {
        doc.field("total_amount").and_then(as_number).unwrap_or(0.0)
    } else {
        rows.iter().filter_map(|row| row.get("amount").and_then(as_number)).sum()
    };

    let header_sql = format!(
        "INSERT INTO {} (organization_id, import_id, {}, customer_id, date, total_amount) VALUES (?, ?, ?, ?, ?, ?)",
        target.header, target.number_column
    );
    let record_id = sqlx::query(&header_sql)
        .bind(organization_id)
        .bind(import_id)
        .bind(doc.number())
        .bind(customer_id)
        .bind(doc.date_text())
        .bind(total_amount)
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

    let item_sql = format!(
        r#"
        INSERT INTO {} ({}, product_code, qty_out, qty_in, description, rate, amount, serial_number)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        target.items, target.parent_column
    );
    for row in &rows {
        let text = |key: &str| row.get(key).and_then(as_text);
        let number = |key: &str| row.get(key).and_then(as_number);

        sqlx::query(&item_sql)
            .bind(record_id)
            .bind(text("product_code"))
            .bind(number("qty_out").or_else(|| number("qty")))
            .bind(number("qty_in"))
            .bind(text("description"))
            .bind(number("rate"))
            .bind(number("amount"))
            .bind(text("serial_number"))
            .execute(&mut **tx)
            .await?;
    }

    Ok((record_id, rows.len(), total_amount))
}

/// Hand the order's shipped cylinders to the customer
async fn assign_shipped_cylinders(
    tx: &mut Transaction<'_, Sqlite>,
    organization_id: &str,
    order_number: &str,
    customer_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE cylinders SET assigned_customer = ?
        WHERE organization_id = ? AND barcode_number IN (
            SELECT bottle_barcode FROM bottle_scans
            WHERE organization_id = ? AND order_number = ? AND mode = 'SHIP'
            UNION
            SELECT shipped.value FROM cylinder_scans, json_each(cylinder_scans.ship_cylinders) AS shipped
            WHERE cylinder_scans.organization_id = ? AND cylinder_scans.order_number = ?
        )
        "#,
    )
    .bind(customer_id)
    .bind(organization_id)
    .bind(organization_id)
    .bind(order_number)
    .bind(organization_id)
    .bind(order_number)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

async fn approve_in_tx(
    pool: &SqlitePool,
    organization_id: &str,
    kind: ImportKind,
    import_id: i64,
) -> Result<ApprovalOutcome> {
    let mut tx = pool.begin().await?;

    // Claiming first takes the write lock before anything is read
    if !claim(&mut *tx, organization_id, kind, import_id, ImportStatus::Approved).await? {
        return Err(claim_failure(&mut *tx, organization_id, kind, import_id).await);
    }

    let sql = format!(
        "SELECT data FROM {} WHERE id = ? AND organization_id = ?",
        kind.staging_table()
    );
    let raw: String = sqlx::query_scalar(&sql)
        .bind(import_id)
        .bind(organization_id)
        .fetch_one(&mut *tx)
        .await?;
    let data: Value = serde_json::from_str(&raw)?;
    let doc = Document::new(kind, &data);

    let (customer, customer_created) = resolve_customer(&mut tx, organization_id, &doc).await?;
    let (record_id, line_items, total_amount) =
        insert_record(&mut tx, organization_id, import_id, &doc, &customer.customer_list_id).await?;

    let cylinders_assigned = match doc.number() {
        Some(order) => {
            assign_shipped_cylinders(&mut tx, organization_id, &order, &customer.customer_list_id).await?
        }
        None => 0,
    };

    tx.commit().await?;

    Ok(ApprovalOutcome {
        import_id,
        kind,
        customer_id: customer.customer_list_id,
        customer_created,
        record_id,
        line_items,
        total_amount,
        cylinders_assigned,
    })
}

/// Approve a pending document
///
/// **Algorithm** (one transaction):
/// 1. Conditionally flip the staged row to `approved`; NotFound / Conflict otherwise
/// 2. Resolve or create the customer
/// 3. Insert the invoice / sales receipt header and its line items
/// 4. Assign cylinders SHIP-scanned for the order to the customer
///
/// Any failure rolls back the whole approval, including the status flip.
pub async fn approve(
    pool: &SqlitePool,
    organization_id: &str,
    kind: ImportKind,
    import_id: i64,
) -> Result<ApprovalOutcome> {
    let max_wait_ms = lock_wait_ms(pool).await?;

    let outcome = retry_on_lock("approve_import", max_wait_ms, || {
        approve_in_tx(pool, organization_id, kind, import_id)
    })
    .await?;

    info!(
        organization_id,
        kind = %kind,
        import_id,
        customer_id = %outcome.customer_id,
        customer_created = outcome.customer_created,
        line_items = outcome.line_items,
        cylinders_assigned = outcome.cylinders_assigned,
        "Import approved"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gct_common::db::init_schema;
    use serde_json::json;

    const ORG: &str = "org-1";

    async fn pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_stage_requires_object() {
        let pool = pool().await;
        assert!(matches!(
            stage_import(&pool, ORG, ImportKind::Invoice, &json!([1, 2])).await,
            Err(Error::InvalidInput(_))
        ));

        let id = stage_import(&pool, ORG, ImportKind::Invoice, &json!({ "invoice_number": "1" }))
            .await
            .unwrap();
        let pending = list_pending(&pool, ORG, ImportKind::Invoice).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert!(pending[0].uploaded_at.is_some());
        assert!(list_pending(&pool, "org-2", ImportKind::Invoice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approve_invoice_creates_customer_and_lines() {
        let pool = pool().await;
        let id = stage_import(
            &pool,
            ORG,
            ImportKind::Invoice,
            &json!({
                "invoice_number": "1001",
                "customer_name": "Acme Welding",
                "date": "2024-05-01",
                "line_items": [
                    { "product_code": "BCS68", "qty_out": 2, "amount": "40.50" },
                    { "product_code": "BCS68", "qty_out": -1, "amount": 0 }
                ]
            }),
        )
        .await
        .unwrap();

        let outcome = approve(&pool, ORG, ImportKind::Invoice, id).await.unwrap();
        assert!(outcome.customer_created);
        assert!(outcome.customer_id.starts_with("80000448-"));
        assert!(outcome.customer_id.ends_with('S'));
        assert_eq!(outcome.line_items, 2);
        assert!((outcome.total_amount - 40.5).abs() < f64::EPSILON);

        let barcode: String = sqlx::query_scalar("SELECT barcode FROM customers WHERE customer_list_id = ?")
            .bind(&outcome.customer_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(barcode, generated_customer_barcode(&outcome.customer_id));

        assert!(list_pending(&pool, ORG, ImportKind::Invoice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approve_reuses_customer_by_name() {
        let pool = pool().await;
        insert_customer(&pool, ORG, &Customer::new("C-1", "Acme Welding")).await.unwrap();
        let id = stage_import(
            &pool,
            ORG,
            ImportKind::Receipt,
            &json!({ "sales_receipt_number": "SR-1", "customer_name": "ACME WELDING", "product_code": "BCS68", "qty": 1 }),
        )
        .await
        .unwrap();

        let outcome = approve(&pool, ORG, ImportKind::Receipt, id).await.unwrap();
        assert_eq!(outcome.customer_id, "C-1");
        assert!(!outcome.customer_created);
        assert_eq!(outcome.line_items, 1);
    }

    #[tokio::test]
    async fn test_approve_reuses_customer_by_record_match() {
        let pool = pool().await;
        insert_customer(&pool, ORG, &Customer::new("80000C0A-1744057121A", "Blue Gas Supply"))
            .await
            .unwrap();
        let id = stage_import(
            &pool,
            ORG,
            ImportKind::Invoice,
            &json!({ "invoice_number": "1003", "customer_id": "80000c0a-1744057121B", "customer_name": "Blue Gas Co" }),
        )
        .await
        .unwrap();

        let outcome = approve(&pool, ORG, ImportKind::Invoice, id).await.unwrap();
        assert_eq!(outcome.customer_id, "80000C0A-1744057121A");
        assert!(!outcome.customer_created);
    }

    #[tokio::test]
    async fn test_approve_without_customer_name_rolls_back() {
        let pool = pool().await;
        let id = stage_import(&pool, ORG, ImportKind::Invoice, &json!({ "invoice_number": "1002" }))
            .await
            .unwrap();

        assert!(matches!(
            approve(&pool, ORG, ImportKind::Invoice, id).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(list_pending(&pool, ORG, ImportKind::Invoice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_approve_assigns_shipped_cylinders() {
        let pool = pool().await;
        for barcode in ["111111111", "222222222", "333333333"] {
            sqlx::query("INSERT INTO cylinders (organization_id, barcode_number) VALUES (?, ?)")
                .bind(ORG)
                .bind(barcode)
                .execute(&pool)
                .await
                .unwrap();
        }
        sqlx::query(
            r#"
            INSERT INTO bottle_scans (organization_id, bottle_barcode, order_number, mode, timestamp, created_at, read)
            VALUES (?, '111111111', '1001', 'SHIP', '2024-05-01T10:00:00+00:00', '2024-05-01T10:00:00+00:00', 0),
                   (?, '333333333', '1001', 'RETURN', '2024-05-01T10:00:00+00:00', '2024-05-01T10:00:00+00:00', 0)
            "#,
        )
        .bind(ORG)
        .bind(ORG)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO cylinder_scans (organization_id, order_number, ship_cylinders, return_cylinders, created_at) VALUES (?, '1001', '[\"222222222\"]', '[]', '2024-05-01T10:00:00+00:00')",
        )
        .bind(ORG)
        .execute(&pool)
        .await
        .unwrap();

        let id = stage_import(
            &pool,
            ORG,
            ImportKind::Invoice,
            &json!({ "invoice_number": "1001", "customer_id": "C-9", "customer_name": "Blue Gas" }),
        )
        .await
        .unwrap();
        let outcome = approve(&pool, ORG, ImportKind::Invoice, id).await.unwrap();

        assert_eq!(outcome.customer_id, "C-9");
        assert_eq!(outcome.cylinders_assigned, 2);
        let returned: Option<String> = sqlx::query_scalar(
            "SELECT assigned_customer FROM cylinders WHERE barcode_number = '333333333'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(returned, None);
    }

    #[tokio::test]
    async fn test_second_transition_conflicts() {
        let pool = pool().await;
        let id = stage_import(&pool, ORG, ImportKind::Invoice, &json!({ "customer_name": "Acme" }))
            .await
            .unwrap();

        reject(&pool, ORG, ImportKind::Invoice, id).await.unwrap();
        assert!(matches!(reject(&pool, ORG, ImportKind::Invoice, id).await, Err(Error::Conflict(_))));
        assert!(matches!(approve(&pool, ORG, ImportKind::Invoice, id).await, Err(Error::Conflict(_))));
        assert!(matches!(approve(&pool, "org-2", ImportKind::Invoice, id).await, Err(Error::NotFound(_))));
        assert!(matches!(approve(&pool, ORG, ImportKind::Receipt, id).await, Err(Error::NotFound(_))));
    }
}
