//! Import reconciliation
//!
//! Compares what a staged invoice or receipt says was shipped and returned with
//! what was actually scanned for the same order. The status is derived on every
//! request and never stored; it does not gate approval.

use crate::services::approval::list_pending;
use crate::services::document::{as_number, Document};
use chrono::{DateTime, Utc};
use gct_common::models::{CylinderScanSession, ImportKind, ImportedDocument, ScanMode, ScanRecord};
use gct_common::time::parse_rfc3339;
use gct_common::Result;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Shipped / returned cylinder counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub shipped: u64,
    pub returned: u64,
}

/// Derived comparison of imported and scanned counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    /// Nothing was scanned for the order
    NoScan,
    Mismatch,
    Match,
}

/// Classify an import against the scans of its order
pub fn classify(imported: Counts, scanned: Option<Counts>) -> ReconcileStatus {
    match scanned {
        None => ReconcileStatus::NoScan,
        Some(scanned) if scanned == imported => ReconcileStatus::Match,
        Some(_) => ReconcileStatus::Mismatch,
    }
}

// ============================================================================
// Imported counts
// ============================================================================

/// Signed quantity of an invoice row: `qty_out`, else `qty`, else 1
fn signed_quantity(row: &Value) -> i64 {
    ["qty_out", "qty"]
        .iter()
        .find_map(|key| row.get(key).and_then(as_number))
        .unwrap_or(1.0)
        .round() as i64
}

// Quantities come from uploaded JSON, so totals saturate instead of overflowing
fn add_signed(counts: &mut Counts, qty: i64) {
    match qty.cmp(&0) {
        Ordering::Greater => counts.shipped = counts.shipped.saturating_add(qty.unsigned_abs()),
        Ordering::Less => counts.returned = counts.returned.saturating_add(qty.unsigned_abs()),
        Ordering::Equal => {}
    }
}

fn positive_quantity(value: Option<&Value>) -> u64 {
    value
        .and_then(as_number)
        .map(|q| q.round())
        .filter(|q| *q > 0.0)
        .map(|q| q as u64)
        .unwrap_or(0)
}

fn invoice_counts(doc: &Document<'_>) -> Counts {
    let mut counts = Counts::default();
    let items = doc.line_items();

    if items.is_empty() {
        // Single-line export: the document is its own line item
        if doc.data().get("product_code").is_some() {
            add_signed(&mut counts, signed_quantity(doc.data()));
            counts.returned = counts.returned.saturating_add(positive_quantity(doc.data().get("qty_in")));
        }
        return counts;
    }

    for row in items {
        add_signed(&mut counts, signed_quantity(row));
        counts.returned = counts.returned.saturating_add(positive_quantity(row.get("qty_in")));
    }
    counts
}

fn receipt_counts(doc: &Document<'_>) -> Counts {
    let data = doc.data();
    let listed = |key: &str| data.get(key).and_then(Value::as_array).map(|a| a.len() as u64);

    Counts {
        shipped: listed("shipped_bottles").unwrap_or_else(|| positive_quantity(doc.field("qty_out"))),
        returned: listed("returned_bottles").unwrap_or_else(|| positive_quantity(doc.field("qty_in"))),
    }
}

/// Shipped and returned quantities a staged document claims
///
/// **Invoices:** each line item contributes `qty_out ?? qty ?? 1`; positive is
/// shipped, negative is returned. A positive `qty_in` is also returned. A
/// document without line items but with a `product_code` is read as one line.
///
/// **Receipts:** the lengths of `shipped_bottles` / `returned_bottles`, each
/// falling back to `qty_out` / `qty_in`.
pub fn imported_counts(kind: ImportKind, data: &Value) -> Counts {
    let doc = Document::new(kind, data);
    match kind {
        ImportKind::Invoice => invoice_counts(&doc),
        ImportKind::Receipt => receipt_counts(&doc),
    }
}

// ============================================================================
// Scan lookup
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ScanTally {
    counts: Counts,
    customer_name: Option<String>,
}

/// Scanned counts per trimmed order number
#[derive(Debug, Clone, Default)]
pub struct ScanLookup {
    by_order: BTreeMap<String, ScanTally>,
}

impl ScanLookup {
    /// Aggregate desktop scan sessions and individual scans
    ///
    /// Scans without an order number are ignored.
    pub fn build(sessions: &[CylinderScanSession], scans: &[ScanRecord]) -> Self {
        let mut lookup = Self::default();

        for session in sessions {
            let Some(tally) = lookup.entry(&session.order_number) else {
                continue;
            };
            tally.counts.shipped += session.ship_cylinders.len() as u64;
            tally.counts.returned += session.return_cylinders.len() as u64;
            if tally.customer_name.is_none() {
                tally.customer_name = session.customer_name.clone();
            }
        }

        for scan in scans {
            let Some(order) = scan.order_number.as_deref() else {
                continue;
            };
            let Some(tally) = lookup.entry(order) else {
                continue;
            };
            match scan.mode {
                ScanMode::Ship => tally.counts.shipped += 1,
                ScanMode::Return => tally.counts.returned += 1,
            }
            if tally.customer_name.is_none() {
                tally.customer_name = scan.customer_name.clone();
            }
        }

        lookup
    }

    fn entry(&mut self, order_number: &str) -> Option<&mut ScanTally> {
        let key = order_number.trim();
        if key.is_empty() {
            return None;
        }
        Some(self.by_order.entry(key.to_string()).or_default())
    }

    pub fn get(&self, order_number: &str) -> Option<Counts> {
        self.by_order.get(order_number.trim()).map(|t| t.counts)
    }

    pub fn len(&self) -> usize {
        self.by_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_order.is_empty()
    }
}

// ============================================================================
// Report
// ============================================================================

/// One staged document with its reconciliation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileEntry {
    pub import_id: i64,
    pub kind: ImportKind,
    pub order_number: Option<String>,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub date: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub imported: Counts,
    pub scanned: Option<Counts>,
    pub status: ReconcileStatus,
    #[serde(skip)]
    sort_key: Option<DateTime<Utc>>,
}

/// Scanned order with no staged document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedScan {
    pub order_number: String,
    pub customer_name: Option<String>,
    pub scanned: Counts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub no_scan: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub entries: Vec<ReconcileEntry>,
    pub unmatched_scans: Vec<UnmatchedScan>,
    pub summary: ReportSummary,
}

fn entry_for(document: &ImportedDocument, lookup: &ScanLookup) -> ReconcileEntry {
    let doc = Document::new(document.kind, &document.data);
    let order_number = doc.number();
    let imported = imported_counts(document.kind, &document.data);
    let scanned = order_number.as_deref().and_then(|o| lookup.get(o));

    ReconcileEntry {
        import_id: document.id,
        kind: document.kind,
        customer_id: doc.customer_id(),
        customer_name: doc.customer_name(),
        date: doc.date_text(),
        uploaded_at: document.uploaded_at,
        imported,
        scanned,
        status: classify(imported, scanned),
        sort_key: doc.date().or(document.uploaded_at),
        order_number,
    }
}

fn matches_search(needle: &str, haystack: &[Option<&str>]) -> bool {
    haystack
        .iter()
        .flatten()
        .any(|value| value.to_lowercase().contains(needle))
}

/// Reconcile staged invoices and receipts against the scan lookup
///
/// **Algorithm:**
/// 1. Drop repeated invoices with the same (invoice number, customer id); the
///    earliest staged copy is kept
/// 2. Derive imported counts and classify each document
/// 3. Collect scanned orders no document refers to
/// 4. Apply the optional case-insensitive search to both lists
/// 5. Newest first by document date, falling back to upload time
pub fn build_report(
    invoices: &[ImportedDocument],
    receipts: &[ImportedDocument],
    lookup: &ScanLookup,
    search: Option<&str>,
) -> ReconcileReport {
    let mut seen_invoices = HashSet::new();
    let unique_invoices = invoices.iter().filter(|doc| {
        let view = Document::new(doc.kind, &doc.data);
        match view.number() {
            Some(number) => seen_invoices.insert((number, view.customer_id())),
            None => true,
        }
    });

    let mut entries: Vec<ReconcileEntry> = unique_invoices
        .chain(receipts.iter())
        .map(|doc| entry_for(doc, lookup))
        .collect();

    let referenced: HashSet<&str> = entries
        .iter()
        .filter_map(|e| e.order_number.as_deref())
        .collect();
    let mut unmatched_scans: Vec<UnmatchedScan> = lookup
        .by_order
        .iter()
        .filter(|(order, _)| !referenced.contains(order.as_str()))
        .map(|(order, tally)| UnmatchedScan {
            order_number: order.clone(),
            customer_name: tally.customer_name.clone(),
            scanned: tally.counts,
        })
        .collect();

    if let Some(needle) = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()) {
        entries.retain(|e| {
            let id = e.import_id.to_string();
            matches_search(
                &needle,
                &[
                    Some(id.as_str()),
                    e.order_number.as_deref(),
                    e.customer_id.as_deref(),
                    e.customer_name.as_deref(),
                ],
            )
        });
        unmatched_scans.retain(|u| {
            matches_search(&needle, &[Some(u.order_number.as_str()), u.customer_name.as_deref()])
        });
    }

    // Undated entries sort last
    entries.sort_by(|a, b| match (a.sort_key, b.sort_key) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    let summary = ReportSummary {
        total: entries.len(),
        matched: entries.iter().filter(|e| e.status == ReconcileStatus::Match).count(),
        mismatched: entries.iter().filter(|e| e.status == ReconcileStatus::Mismatch).count(),
        no_scan: entries.iter().filter(|e| e.status == ReconcileStatus::NoScan).count(),
    };

    ReconcileReport {
        entries,
        unmatched_scans,
        summary,
    }
}

// ============================================================================
// Loading
// ============================================================================

async fn load_scan_sessions(pool: &SqlitePool, organization_id: &str) -> Result<Vec<CylinderScanSession>> {
    let rows = sqlx::query(
        r#"
        SELECT order_number, customer_name, ship_cylinders, return_cylinders
        FROM cylinder_scans WHERE organization_id = ? ORDER BY id
        "#,
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let ship: String = row.try_get("ship_cylinders")?;
            let ret: String = row.try_get("return_cylinders")?;
            Ok(CylinderScanSession {
                order_number: row.try_get("order_number")?,
                customer_name: row.try_get("customer_name")?,
                ship_cylinders: serde_json::from_str(&ship)?,
                return_cylinders: serde_json::from_str(&ret)?,
            })
        })
        .collect()
}

async fn load_order_scans(pool: &SqlitePool, organization_id: &str) -> Result<Vec<ScanRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, organization_id, bottle_barcode, order_number, customer_id, customer_name,
               mode, location, user_id, timestamp, created_at, read
        FROM bottle_scans
        WHERE organization_id = ? AND order_number IS NOT NULL
        ORDER BY id
        "#,
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
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
                mode: ScanMode::parse_loose(&mode).ok_or_else(|| {
                    gct_common::Error::Internal(format!("Invalid scan mode in database: {}", mode))
                })?,
                location: row.try_get("location")?,
                user_id: row.try_get("user_id")?,
                timestamp: parse_rfc3339(&timestamp)?,
                created_at: parse_rfc3339(&created_at)?,
                read: read != 0,
            })
        })
        .collect()
}

/// Reconcile every pending import of an organization
pub async fn load_report(
    pool: &SqlitePool,
    organization_id: &str,
    search: Option<&str>,
) -> Result<ReconcileReport> {
    let invoices = list_pending(pool, organization_id, ImportKind::Invoice).await?;
    let receipts = list_pending(pool, organization_id, ImportKind::Receipt).await?;
    let sessions = load_scan_sessions(pool, organization_id).await?;
    let scans = load_order_scans(pool, organization_id).await?;

    let lookup = ScanLookup::build(&sessions, &scans);
    debug!(
        organization_id,
        invoices = invoices.len(),
        receipts = receipts.len(),
        scanned_orders = lookup.len(),
        "Building reconciliation report"
    );

    Ok(build_report(&invoices, &receipts, &lookup, search))
}
