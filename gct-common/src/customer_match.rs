//! Import-time customer record matching
//!
//! Used when an approved import names a customer that may already exist under a
//! slightly different id or spelling.

use crate::models::Customer;

/// Lowercase, trim, and drop trailing letters (`80000C0A-1744057121A` → `80000c0a-1744057121`)
pub fn normalize_customer_id(id: &str) -> String {
    id.trim()
        .to_lowercase()
        .trim_end_matches(|c: char| c.is_ascii_lowercase())
        .to_string()
}

fn compact_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Find an existing customer for an imported (id, name, barcode) triple
///
/// Checked per existing record, first hit wins:
/// 1. Normalized id equality (case and trailing letters ignored)
/// 2. Barcode equality (case-insensitive)
/// 3. Exact name equality (case-insensitive)
/// 4. Compacted name equality, only for compacted names longer than 5 characters
pub fn match_customer_record<'a>(
    id: Option<&str>,
    name: Option<&str>,
    barcode: Option<&str>,
    existing: &'a [Customer],
) -> Option<&'a Customer> {
    let id_norm = id.map(normalize_customer_id).filter(|s| !s.is_empty());
    let barcode_norm = barcode
        .map(|b| b.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let name_norm = name.map(|n| n.trim().to_lowercase()).filter(|s| !s.is_empty());
    let name_compact = name.map(compact_name).filter(|s| s.len() > 5);

    existing.iter().find(|candidate| {
        if let Some(id_norm) = &id_norm {
            if normalize_customer_id(&candidate.customer_list_id) == *id_norm {
                return true;
            }
        }
        if let (Some(wanted), Some(have)) = (&barcode_norm, candidate.barcode.as_deref()) {
            if have.trim().to_lowercase() == *wanted {
                return true;
            }
        }
        if let Some(name_norm) = &name_norm {
            if candidate.name.trim().to_lowercase() == *name_norm {
                return true;
            }
        }
        if let Some(name_compact) = &name_compact {
            if compact_name(&candidate.name) == *name_compact {
                return true;
            }
        }
        false
    })
}
