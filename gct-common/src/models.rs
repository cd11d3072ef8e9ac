//! Domain models shared by the scan and import services
//!
//! Rows are owned by the relational store; these types are the shapes the
//! services read and write. Timestamps are persisted as RFC 3339 TEXT.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Customers and cylinders
// ============================================================================

/// Customer record
///
/// `CustomerListID` is the stable identity; `barcode` is an optional secondary
/// identifier printed on receipts as `%<8-hex>-<10-digit>[letter]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(rename = "CustomerListID")]
    pub customer_list_id: String,
    pub name: String,
    #[serde(default)]
    pub barcode: Option<String>,
}

impl Customer {
    pub fn new(customer_list_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            customer_list_id: customer_list_id.into(),
            name: name.into(),
            barcode: None,
        }
    }

    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        self.barcode = Some(barcode.into());
        self
    }
}

/// Cylinder (asset) record, unique per organization by `barcode_number`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cylinder {
    pub barcode_number: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub assigned_customer: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub product_code: Option<String>,
}

// ============================================================================
// Scans
// ============================================================================

/// Direction of a cylinder movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanMode {
    /// Outbound to a customer
    Ship,
    /// Inbound from a customer
    Return,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Ship => "SHIP",
            ScanMode::Return => "RETURN",
        }
    }

    /// Accepts the spellings the mobile clients send (`out`/`in`, any case)
    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SHIP" | "OUT" => Some(ScanMode::Ship),
            "RETURN" | "IN" => Some(ScanMode::Return),
            _ => None,
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted scan event (`bottle_scans` row)
///
/// Immutable once written; only `read` may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: i64,
    pub organization_id: String,
    pub bottle_barcode: String,
    pub order_number: Option<String>,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub mode: ScanMode,
    pub location: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// One scan session as recorded by the desktop flow (`cylinder_scans` row)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CylinderScanSession {
    pub order_number: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub ship_cylinders: Vec<String>,
    #[serde(default)]
    pub return_cylinders: Vec<String>,
}

// ============================================================================
// Staged imports
// ============================================================================

/// Kind of staged import document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Invoice,
    Receipt,
}

impl ImportKind {
    /// Staging table holding pending documents of this kind
    pub fn staging_table(&self) -> &'static str {
        match self {
            ImportKind::Invoice => "imported_invoices",
            ImportKind::Receipt => "imported_sales_receipts",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Invoice => "invoice",
            ImportKind::Receipt => "receipt",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "invoice" | "invoices" => Some(ImportKind::Invoice),
            "receipt" | "receipts" | "sales_receipt" | "sales_receipts" => Some(ImportKind::Receipt),
            _ => None,
        }
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval state of a staged import; only `Pending` may transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Approved,
    Rejected,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Approved => "approved",
            ImportStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(ImportStatus::Pending),
            "approved" => Some(ImportStatus::Approved),
            "rejected" => Some(ImportStatus::Rejected),
            _ => None,
        }
    }
}

/// Staged invoice or sales receipt awaiting operator review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedDocument {
    pub id: i64,
    pub kind: ImportKind,
    pub status: ImportStatus,
    /// Raw document as uploaded (invoice_number, customer_name, line_items, ...)
    pub data: serde_json::Value,
    pub uploaded_at: Option<DateTime<Utc>>,
}
