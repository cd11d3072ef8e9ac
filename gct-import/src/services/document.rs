//! Read access to staged import documents
//!
//! Staged documents are stored as the JSON the uploader produced. Exports from
//! different accounting tools disagree on key names and on whether numbers are
//! JSON numbers or strings, so every read goes through these accessors.

use chrono::{DateTime, NaiveDate, Utc};
use gct_common::models::ImportKind;
use serde_json::Value;

/// Keys holding the document number, most specific first
fn number_keys(kind: ImportKind) -> &'static [&'static str] {
    match kind {
        ImportKind::Invoice => &["invoice_number", "order_number", "reference_number"],
        ImportKind::Receipt => &[
            "sales_receipt_number",
            "receipt_number",
            "order_number",
            "reference_number",
            "invoice_number",
        ],
    }
}

/// Finite number from a JSON number or a numeric string (`"inf"` / `"NaN"` are not numbers)
pub fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

/// Non-empty trimmed text; numbers are rendered (`1001` → `"1001"`)
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse the date formats seen in exports: RFC 3339, `YYYY-MM-DD`, `MM/DD/YYYY`
pub fn parse_document_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Borrowed view over one staged document
#[derive(Debug, Clone, Copy)]
pub struct Document<'a> {
    kind: ImportKind,
    data: &'a Value,
}

impl<'a> Document<'a> {
    pub fn new(kind: ImportKind, data: &'a Value) -> Self {
        Self { kind, data }
    }

    pub fn kind(&self) -> ImportKind {
        self.kind
    }

    pub fn data(&self) -> &'a Value {
        self.data
    }

    /// `line_items`, or `rows` for spreadsheet-style uploads
    pub fn line_items(&self) -> &'a [Value] {
        ["line_items", "rows"]
            .iter()
            .find_map(|key| self.data.get(key).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Top-level field, else the same field on the first line item
    pub fn field(&self, key: &str) -> Option<&'a Value> {
        self.data
            .get(key)
            .filter(|v| !v.is_null())
            .or_else(|| self.line_items().first().and_then(|row| row.get(key)))
            .filter(|v| !v.is_null())
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.field(key).and_then(as_text)
    }

    /// Invoice or receipt number; also the order number scans are keyed by
    pub fn number(&self) -> Option<String> {
        number_keys(self.kind).iter().find_map(|key| self.text(key))
    }

    pub fn customer_id(&self) -> Option<String> {
        self.text("customer_id")
    }

    pub fn customer_name(&self) -> Option<String> {
        self.text("customer_name")
    }

    pub fn date_text(&self) -> Option<String> {
        self.text("date")
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.date_text().as_deref().and_then(parse_document_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fields_fall_back_to_first_row() {
        let data = json!({
            "rows": [
                { "invoice_number": 1001, "customer_id": "C1", "customer_name": " Acme ", "date": "05/01/2024" },
                { "invoice_number": 1001, "customer_id": "C1" }
            ]
        });
        let doc = Document::new(ImportKind::Invoice, &data);

        assert_eq!(doc.line_items().len(), 2);
        assert_eq!(doc.number().as_deref(), Some("1001"));
        assert_eq!(doc.customer_name().as_deref(), Some("Acme"));
        assert_eq!(doc.date().unwrap().to_rfc3339(), "2024-05-01T00:00:00+00:00");
    }

    #[test]
    fn test_receipt_number_keys() {
        let data = json!({ "sales_receipt_number": "SR-7", "order_number": "SO-7" });
        assert_eq!(Document::new(ImportKind::Receipt, &data).number().as_deref(), Some("SR-7"));
        assert_eq!(Document::new(ImportKind::Invoice, &data).number().as_deref(), Some("SO-7"));
    }

    #[test]
    fn test_numbers_from_strings() {
        assert_eq!(as_number(&json!("-2")), Some(-2.0));
        assert_eq!(as_number(&json!(3)), Some(3.0));
        assert_eq!(as_number(&json!("n/a")), None);
        assert_eq!(as_number(&json!("inf")), None);
        assert_eq!(as_number(&json!("-infinity")), None);
        assert_eq!(as_number(&json!("NaN")), None);
        assert_eq!(as_text(&json!("   ")), None);
    }

    #[test]
    fn test_date_formats() {
        assert!(parse_document_date("2024-05-01").is_some());
        assert!(parse_document_date("2024-05-01T10:00:00Z").is_some());
        assert!(parse_document_date("May 1").is_none());
    }
}
