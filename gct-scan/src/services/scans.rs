//! Scan recording
//!
//! `bottle_scans` is append-only: rows are never updated except for the `read`
//! flag. Replays of the same event collapse on the dedup index
//! (organization, barcode, order, mode, client timestamp).

use crate::services::validation::{validate_barcode, validate_order_number};
use chrono::{DateTime, Utc};
use gct_common::db::{get_setting_i64, retry_on_lock, DEFAULT_BUSY_TIMEOUT_MS};
use gct_common::models::{CylinderScanSession, ScanMode, ScanRecord};
use gct_common::time::parse_rfc3339;
use gct_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

/// Status written to a cylinder when it comes back from a customer
pub const RETURNED_CYLINDER_STATUS: &str = "empty";

/// Scan as submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScan {
    pub bottle_barcode: String,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    /// `SHIP` / `RETURN`, or the `out` / `in` spellings
    pub mode: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Client capture time; server time when absent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Validated scan ready to insert
#[derive(Debug, Clone)]
struct PreparedScan {
    bottle_barcode: String,
    order_number: Option<String>,
    customer_id: Option<String>,
    customer_name: Option<String>,
    mode: ScanMode,
    location: Option<String>,
    user_id: Option<String>,
    timestamp: String,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl NewScan {
    /// Run the same checks `record_scan` would, without writing
    pub fn validate(&self) -> Result<()> {
        self.prepare().map(|_| ())
    }

    fn prepare(&self) -> Result<PreparedScan> {
        let bottle_barcode = validate_barcode(&self.bottle_barcode)?.to_string();
        let order_number = match non_empty(&self.order_number) {
            Some(order) => Some(validate_order_number(&order)?.to_string()),
            None => None,
        };
        let mode = ScanMode::parse_loose(&self.mode)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown scan mode: {}", self.mode)))?;

        Ok(PreparedScan {
            bottle_barcode,
            order_number,
            customer_id: non_empty(&self.customer_id),
            customer_name: non_empty(&self.customer_name),
            mode,
            location: non_empty(&self.location),
            user_id: non_empty(&self.user_id),
            timestamp: self.timestamp.unwrap_or_else(Utc::now).to_rfc3339(),
        })
    }
}

/// Outcome of writing one scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedScan {
    pub scan: ScanRecord,
    /// True when an identical event was already stored
    pub duplicate: bool,
}

/// Outcome of writing a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

fn row_to_scan(row: &sqlx::sqlite::SqliteRow) -> Result<ScanRecord> {
    let mode: String = row.try_get("mode")?;
    let timestamp: String = row.try_get("timestamp")?;
    let created_at: String = row.try_get("created_at")?;
    let read: i64 = row.try_get("read")?;

    Ok(ScanRecord {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        bottle_barcode: row.try_get("bottle_barcode")?,
        order_number: row.try_get("order_number")?,
        customer_id: row.try_get("customer_id")?,
        customer_name: row.try_get("customer_name")?,
        mode: ScanMode::parse_loose(&mode)
            .ok_or_else(|| Error::Internal(format!("Invalid scan mode in database: {}", mode)))?,
        location: row.try_get("location")?,
        user_id: row.try_get("user_id")?,
        timestamp: parse_rfc3339(&timestamp)?,
        created_at: parse_rfc3339(&created_at)?,
        read: read != 0,
    })
}

const SCAN_COLUMNS: &str = "id, organization_id, bottle_barcode, order_number, customer_id, \
     customer_name, mode, location, user_id, timestamp, created_at, read";

/// Insert one prepared scan inside a transaction; returns (row, inserted)
async fn insert_prepared(
    tx: &mut Transaction<'_, Sqlite>,
    organization_id: &str,
    scan: &PreparedScan,
) -> Result<(ScanRecord, bool)> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO bottle_scans
            (organization_id, bottle_barcode, order_number, customer_id, customer_name,
             mode, location, user_id, timestamp, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(organization_id)
    .bind(&scan.bottle_barcode)
    .bind(&scan.order_number)
    .bind(&scan.customer_id)
    .bind(&scan.customer_name)
    .bind(scan.mode.as_str())
    .bind(&scan.location)
    .bind(&scan.user_id)
    .bind(&scan.timestamp)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;

    let inserted = result.rows_affected() == 1;

    if inserted && scan.mode == ScanMode::Return {
        sqlx::query(
            "UPDATE cylinders SET status = ? WHERE organization_id = ? AND barcode_number = ?",
        )
        .bind(RETURNED_CYLINDER_STATUS)
        .bind(organization_id)
        .bind(&scan.bottle_barcode)
        .execute(&mut **tx)
        .await?;
    }

    let sql = format!(
        r#"
        SELECT {} FROM bottle_scans
        WHERE organization_id = ? AND bottle_barcode = ?
          AND IFNULL(order_number, '') = IFNULL(?, '')
          AND mode = ? AND timestamp = ?
        "#,
        SCAN_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(organization_id)
        .bind(&scan.bottle_barcode)
        .bind(&scan.order_number)
        .bind(scan.mode.as_str())
        .bind(&scan.timestamp)
        .fetch_one(&mut **tx)
        .await?;

    Ok((row_to_scan(&row)?, inserted))
}

async fn lock_wait_ms(pool: &SqlitePool) -> Result<u64> {
    let ms = get_setting_i64(pool, "max_lock_wait_ms", DEFAULT_BUSY_TIMEOUT_MS as i64).await?;
    Ok(ms.max(0) as u64)
}

/// Validate and store one scan
///
/// **Algorithm:**
/// 1. Validate barcode and order number, normalize mode (`out` → SHIP, `in` → RETURN)
/// 2. `INSERT OR IGNORE` into `bottle_scans`
/// 3. For a newly stored RETURN, mark the cylinder `empty`
///
/// Validation failures are `Error::InvalidInput`; nothing is written.
pub async fn record_scan(
    pool: &SqlitePool,
    organization_id: &str,
    scan: &NewScan,
) -> Result<RecordedScan> {
    let prepared = scan.prepare()?;
    let max_wait_ms = lock_wait_ms(pool).await?;

    let (record, inserted) = retry_on_lock("record_scan", max_wait_ms, || async {
        let mut tx = pool.begin().await?;
        let outcome = insert_prepared(&mut tx, organization_id, &prepared).await?;
        tx.commit().await?;
        Ok::<_, Error>(outcome)
    })
    .await?;

    if inserted {
        info!(
            organization_id,
            bottle_barcode = %record.bottle_barcode,
            mode = %record.mode,
            order_number = ?record.order_number,
            "Scan recorded"
        );
    } else {
        debug!(
            organization_id,
            bottle_barcode = %record.bottle_barcode,
            "Duplicate scan ignored"
        );
    }

    Ok(RecordedScan {
        scan: record,
        duplicate: !inserted,
    })
}

/// Store a batch in one transaction; any invalid scan rejects the whole batch
pub async fn record_scans_batch(
    pool: &SqlitePool,
    organization_id: &str,
    scans: &[NewScan],
) -> Result<BatchOutcome> {
    let prepared = scans
        .iter()
        .map(NewScan::prepare)
        .collect::<Result<Vec<_>>>()?;
    let max_wait_ms = lock_wait_ms(pool).await?;

    let outcome = retry_on_lock("record_scans_batch", max_wait_ms, || async {
        let mut tx = pool.begin().await?;
        let mut outcome = BatchOutcome::default();
        for scan in &prepared {
            let (_, inserted) = insert_prepared(&mut tx, organization_id, scan).await?;
            if inserted {
                outcome.inserted += 1;
            } else {
                outcome.duplicates += 1;
            }
        }
        tx.commit().await?;
        Ok::<_, Error>(outcome)
    })
    .await?;

    info!(
        organization_id,
        inserted = outcome.inserted,
        duplicates = outcome.duplicates,
        "Scan batch recorded"
    );

    Ok(outcome)
}

/// Set the `read` flag; the only mutation allowed on a stored scan
pub async fn mark_scan_read(pool: &SqlitePool, organization_id: &str, scan_id: i64) -> Result<()> {
    let result = sqlx::query("UPDATE bottle_scans SET read = 1 WHERE id = ? AND organization_id = ?")
        .bind(scan_id)
        .bind(organization_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Scan {} not found", scan_id)));
    }
    Ok(())
}

/// All scans of one order, oldest first
pub async fn list_scans_for_order(
    pool: &SqlitePool,
    organization_id: &str,
    order_number: &str,
) -> Result<Vec<ScanRecord>> {
    let sql = format!(
        "SELECT {} FROM bottle_scans WHERE organization_id = ? AND order_number = ? ORDER BY timestamp, id",
        SCAN_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(organization_id)
        .bind(order_number.trim())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_scan).collect()
}

/// Store one desktop scan session (`cylinder_scans`); returns the row id
///
/// Sessions carry whole ship/return lists for an order and are what the
/// import reconciliation counts alongside individual scans.
pub async fn record_scan_session(
    pool: &SqlitePool,
    organization_id: &str,
    session: &CylinderScanSession,
) -> Result<i64> {
    let order_number = validate_order_number(&session.order_number)?.to_string();
    let clean_list = |barcodes: &[String]| -> Result<Vec<String>> {
        barcodes
            .iter()
            .map(|b| validate_barcode(b).map(str::to_string).map_err(Error::from))
            .collect()
    };
    let ship = clean_list(&session.ship_cylinders)?;
    let returned = clean_list(&session.return_cylinders)?;

    let result = sqlx::query(
        r#"
        INSERT INTO cylinder_scans
            (organization_id, order_number, customer_name, ship_cylinders, return_cylinders, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(organization_id)
    .bind(&order_number)
    .bind(non_empty(&session.customer_name))
    .bind(serde_json::to_string(&ship)?)
    .bind(serde_json::to_string(&returned)?)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    info!(
        organization_id,
        order_number = %order_number,
        shipped = ship.len(),
        returned = returned.len(),
        "Scan session recorded"
    );

    Ok(result.last_insert_rowid())
}

/// Barcodes of the organization's cylinders (recovery candidates)
pub async fn known_cylinder_barcodes(pool: &SqlitePool, organization_id: &str) -> Result<Vec<String>> {
    let barcodes = sqlx::query_scalar(
        "SELECT barcode_number FROM cylinders WHERE organization_id = ? ORDER BY barcode_number",
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    Ok(barcodes)
}
