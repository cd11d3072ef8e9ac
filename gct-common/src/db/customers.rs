//! Customer table access
//!
//! Customers are read by both services: the scan service matches scanned codes
//! against them and the import service resolves or creates them on approval.

use crate::models::Customer;
use crate::Result;
use sqlx::{Row, Sqlite, SqlitePool};

fn row_to_customer(row: &sqlx::sqlite::SqliteRow) -> Result<Customer> {
    Ok(Customer {
        customer_list_id: row.try_get("customer_list_id")?,
        name: row.try_get("name")?,
        barcode: row.try_get("barcode")?,
    })
}

/// All customers of an organization, in insertion order
pub async fn list_customers(pool: &SqlitePool, organization_id: &str) -> Result<Vec<Customer>> {
    let rows = sqlx::query(
        "SELECT customer_list_id, name, barcode FROM customers WHERE organization_id = ? ORDER BY id",
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_customer).collect()
}

/// Case-insensitive lookup by `CustomerListID`
pub async fn find_customer_by_list_id<'e, E>(
    executor: E,
    organization_id: &str,
    customer_list_id: &str,
) -> Result<Option<Customer>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT customer_list_id, name, barcode FROM customers
        WHERE organization_id = ? AND customer_list_id = ? COLLATE NOCASE
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(organization_id)
    .bind(customer_list_id.trim())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(row_to_customer).transpose()
}

/// Insert a customer; fails on a duplicate `CustomerListID` within the organization
pub async fn insert_customer<'e, E>(
    executor: E,
    organization_id: &str,
    customer: &Customer,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO customers (organization_id, customer_list_id, name, barcode) VALUES (?, ?, ?, ?)",
    )
    .bind(organization_id)
    .bind(&customer.customer_list_id)
    .bind(&customer.name)
    .bind(&customer.barcode)
    .execute(executor)
    .await?;

    Ok(())
}
