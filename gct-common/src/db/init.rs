//! Database initialization
//!
//! The same schema serves the central services and the device-local store that
//! backs the offline scan queue. Every statement is `IF NOT EXISTS`, so opening an
//! existing database is a no-op migration.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default SQLite busy timeout applied to every pool
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Open (creating if needed) the database file and ensure the schema exists
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas are per connection, so they go on the connect options
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables
///
/// Exposed separately so tests can run it against `sqlite::memory:`; the pragmas
/// here only reach whichever connection runs them.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    let pragma_sql = format!("PRAGMA busy_timeout = {}", DEFAULT_BUSY_TIMEOUT_MS);
    sqlx::query(&pragma_sql).execute(pool).await?;

    create_settings_table(pool).await?;
    create_customers_table(pool).await?;
    create_cylinders_table(pool).await?;
    create_bottle_scans_table(pool).await?;
    create_cylinder_scans_table(pool).await?;
    create_staging_tables(pool).await?;
    create_invoice_tables(pool).await?;
    create_sales_receipt_tables(pool).await?;
    create_offline_scans_table(pool).await?;

    Ok(())
}

/// Key-value settings (last sync time, lock-wait tuning, ...)
async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_customers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            customer_list_id TEXT NOT NULL,
            name TEXT NOT NULL,
            barcode TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (organization_id, customer_list_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_cylinders_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cylinders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            barcode_number TEXT NOT NULL,
            serial_number TEXT,
            status TEXT,
            location TEXT,
            assigned_customer TEXT,
            group_name TEXT,
            product_code TEXT,
            UNIQUE (organization_id, barcode_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Append-only scan events
///
/// The expression index makes replays of the same event (same barcode, order,
/// mode and client timestamp) collapse into one row.
async fn create_bottle_scans_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bottle_scans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            bottle_barcode TEXT NOT NULL,
            order_number TEXT,
            customer_id TEXT,
            customer_name TEXT,
            mode TEXT NOT NULL CHECK (mode IN ('SHIP', 'RETURN')),
            location TEXT,
            user_id TEXT,
            timestamp TEXT NOT NULL,
            created_at TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_bottle_scans_dedup
        ON bottle_scans (organization_id, bottle_barcode, IFNULL(order_number, ''), mode, timestamp)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_bottle_scans_order ON bottle_scans (organization_id, order_number)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Scan sessions recorded as whole orders (ship/return barcode lists as JSON)
async fn create_cylinder_scans_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cylinder_scans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            order_number TEXT NOT NULL,
            customer_name TEXT,
            ship_cylinders TEXT NOT NULL DEFAULT '[]',
            return_cylinders TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Staged documents awaiting approval
async fn create_staging_tables(pool: &SqlitePool) -> Result<()> {
    for table in ["imported_invoices", "imported_sales_receipts"] {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                organization_id TEXT NOT NULL,
                data TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'approved', 'rejected')),
                uploaded_at TEXT NOT NULL,
                reviewed_at TEXT
            )
            "#,
            table
        );
        sqlx::query(&sql).execute(pool).await?;
    }

    Ok(())
}

async fn create_invoice_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            import_id INTEGER,
            invoice_number TEXT,
            customer_id TEXT NOT NULL,
            date TEXT,
            total_amount REAL NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoice_line_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            invoice_id INTEGER NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
            product_code TEXT,
            qty_out REAL,
            qty_in REAL,
            description TEXT,
            rate REAL,
            amount REAL,
            serial_number TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sales_receipt_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sales_receipts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            import_id INTEGER,
            sales_receipt_number TEXT,
            customer_id TEXT NOT NULL,
            date TEXT,
            total_amount REAL NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sales_receipt_line_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sales_receipt_id INTEGER NOT NULL REFERENCES sales_receipts(id) ON DELETE CASCADE,
            product_code TEXT,
            qty_out REAL,
            qty_in REAL,
            description TEXT,
            rate REAL,
            amount REAL,
            serial_number TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Device-local queue of scans captured while offline
async fn create_offline_scans_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS offline_scans (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            payload TEXT NOT NULL,
            queued_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
