//! Damaged barcode recovery
//!
//! Reconstructs partially readable codes. Methods are tried from most to least
//! reliable and the first success wins:
//!
//! 1. **Pattern** - OCR fix-up, then the format's pattern and check digit
//! 2. **Checksum** - append a missing check digit, or repair one substituted digit
//! 3. **Fuzzy** - nearest known barcode within Levenshtein distance 3
//! 4. **Known prefix** - a known barcode starting with the first 70% of the input

use crate::services::matching::correct_ocr;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

const MAX_FUZZY_DISTANCE: usize = 3;
const KNOWN_PREFIX_RATIO: f64 = 0.7;

static EAN13_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{13}$").expect("valid regex"));
static EAN8_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8}$").expect("valid regex"));
static UPC_A_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{12}$").expect("valid regex"));
static RECEIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]{8}-[0-9]{10}[A-Za-z]?$").expect("valid regex"));
static CODE39_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Z\-. $/+%]+$").expect("valid regex"));
static CODE128_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\x00-\x7F]+$").expect("valid regex"));

/// Symbologies the recovery engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeFormat {
    Ean13,
    Ean8,
    UpcA,
    SalesReceipt,
    Code39,
    Code128,
}

impl BarcodeFormat {
    /// Formats with enough structure to be recognized from the value alone.
    /// Code 39 and Code 128 accept nearly any ASCII and must be requested explicitly.
    const DETECTABLE: [BarcodeFormat; 4] = [
        BarcodeFormat::Ean13,
        BarcodeFormat::Ean8,
        BarcodeFormat::UpcA,
        BarcodeFormat::SalesReceipt,
    ];

    fn pattern(&self) -> &'static Regex {
        match self {
            BarcodeFormat::Ean13 => &EAN13_RE,
            BarcodeFormat::Ean8 => &EAN8_RE,
            BarcodeFormat::UpcA => &UPC_A_RE,
            BarcodeFormat::SalesReceipt => &RECEIPT_RE,
            BarcodeFormat::Code39 => &CODE39_RE,
            BarcodeFormat::Code128 => &CODE128_RE,
        }
    }

    /// Fixed length including the check digit, for GTIN formats
    pub fn check_digit_length(&self) -> Option<usize> {
        match self {
            BarcodeFormat::Ean13 => Some(13),
            BarcodeFormat::Ean8 => Some(8),
            BarcodeFormat::UpcA => Some(12),
            _ => None,
        }
    }

    pub fn detect(barcode: &str) -> Option<Self> {
        Self::DETECTABLE.into_iter().find(|f| f.pattern().is_match(barcode))
    }
}

// ============================================================================
// Check digits
// ============================================================================

/// GTIN check digit for a payload (EAN-13 / EAN-8 / UPC-A without its last digit)
///
/// Weights alternate 3, 1, 3, ... starting from the rightmost payload digit.
pub fn gtin_check_digit(payload: &str) -> Option<u8> {
    if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let sum: u32 = payload
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 0 {
                digit * 3
            } else {
                digit
            }
        })
        .sum();

    Some(((10 - sum % 10) % 10) as u8)
}

fn validate_gtin(code: &str, len: usize) -> bool {
    if code.len() != len || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let (payload, check) = code.split_at(len - 1);
    gtin_check_digit(payload) == Some(check.as_bytes()[0] - b'0')
}

pub fn validate_ean13(code: &str) -> bool {
    validate_gtin(code, 13)
}

pub fn validate_ean8(code: &str) -> bool {
    validate_gtin(code, 8)
}

pub fn validate_upc_a(code: &str) -> bool {
    validate_gtin(code, 12)
}

// ============================================================================
// Recovery engine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMethod {
    Pattern,
    Checksum,
    Fuzzy,
    KnownPrefix,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryResult {
    pub original: String,
    pub reconstructed: String,
    /// 0-100
    pub confidence: u8,
    pub method: RecoveryMethod,
    pub success: bool,
}

impl RecoveryResult {
    fn recovered(original: &str, reconstructed: String, confidence: u8, method: RecoveryMethod) -> Self {
        Self {
            original: original.to_string(),
            reconstructed,
            confidence,
            method,
            success: true,
        }
    }

    fn failed(original: &str) -> Self {
        Self {
            original: original.to_string(),
            reconstructed: original.to_string(),
            confidence: 0,
            method: RecoveryMethod::None,
            success: false,
        }
    }
}

/// Recovery engine holding the known barcodes used by the fuzzy and prefix steps
#[derive(Debug, Clone, Default)]
pub struct DamageRecovery {
    known: BTreeSet<String>,
}

impl DamageRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored trimmed and uppercased, the form `attempt` compares against
    pub fn add_known_barcodes<I, S>(&mut self, barcodes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known.extend(barcodes.into_iter().map(|b| {
            let barcode: String = b.into();
            barcode.trim().to_ascii_uppercase()
        }));
    }

    pub fn clear_known_barcodes(&mut self) {
        self.known.clear();
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Try every method in order; `success == false` when none applies
    pub fn attempt(&self, barcode: &str, format: Option<BarcodeFormat>) -> RecoveryResult {
        let cleaned = correct_ocr(&barcode.trim().to_ascii_uppercase());
        let format = format.or_else(|| BarcodeFormat::detect(&cleaned));

        let result = self
            .recover_with_pattern(barcode, &cleaned, format)
            .or_else(|| format.and_then(|f| self.recover_with_checksum(barcode, &cleaned, f)))
            .or_else(|| self.recover_with_fuzzy_match(barcode, &cleaned))
            .or_else(|| self.recover_with_known_prefix(barcode, &cleaned))
            .unwrap_or_else(|| RecoveryResult::failed(barcode));

        debug!(
            original = %result.original,
            reconstructed = %result.reconstructed,
            method = ?result.method,
            confidence = result.confidence,
            "Barcode recovery attempted"
        );

        result
    }

    /// Pattern match after OCR fix-up; a format with a check digit must also validate
    fn recover_with_pattern(
        &self,
        original: &str,
        cleaned: &str,
        format: Option<BarcodeFormat>,
    ) -> Option<RecoveryResult> {
        let format = format?;
        if !format.pattern().is_match(cleaned) {
            return None;
        }

        match format.check_digit_length() {
            Some(len) if validate_gtin(cleaned, len) => Some(RecoveryResult::recovered(
                original,
                cleaned.to_string(),
                95,
                RecoveryMethod::Pattern,
            )),
            Some(_) => None,
            None => Some(RecoveryResult::recovered(
                original,
                cleaned.to_string(),
                75,
                RecoveryMethod::Pattern,
            )),
        }
    }

    fn recover_with_checksum(
        &self,
        original: &str,
        cleaned: &str,
        format: BarcodeFormat,
    ) -> Option<RecoveryResult> {
        let len = format.check_digit_length()?;
        if !cleaned.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        if cleaned.len() == len - 1 {
            let check = gtin_check_digit(cleaned)?;
            return Some(RecoveryResult::recovered(
                original,
                format!("{}{}", cleaned, check),
                85,
                RecoveryMethod::Checksum,
            ));
        }

        if cleaned.len() == len {
            for idx in 0..len {
                for digit in b'0'..=b'9' {
                    let mut bytes = cleaned.as_bytes().to_vec();
                    bytes[idx] = digit;
                    let candidate = String::from_utf8(bytes).ok()?;
                    if validate_gtin(&candidate, len) {
                        return Some(RecoveryResult::recovered(
                            original,
                            candidate,
                            70,
                            RecoveryMethod::Checksum,
                        ));
                    }
                }
            }
        }

        None
    }

    fn recover_with_fuzzy_match(&self, original: &str, cleaned: &str) -> Option<RecoveryResult> {
        let (best, distance) = self
            .known
            .iter()
            .map(|known| (known, strsim::levenshtein(cleaned, known)))
            .filter(|(_, d)| *d <= MAX_FUZZY_DISTANCE)
            .min_by_key(|(_, d)| *d)?;

        let max_len = cleaned.chars().count().max(best.chars().count()).max(1);
        let confidence = ((1.0 - distance as f64 / max_len as f64) * 100.0).round() as u8;

        Some(RecoveryResult::recovered(
            original,
            best.clone(),
            confidence,
            RecoveryMethod::Fuzzy,
        ))
    }

    fn recover_with_known_prefix(&self, original: &str, cleaned: &str) -> Option<RecoveryResult> {
        if self.known.contains(cleaned) {
            return Some(RecoveryResult::recovered(
                original,
                cleaned.to_string(),
                100,
                RecoveryMethod::KnownPrefix,
            ));
        }

        let keep = (cleaned.chars().count() as f64 * KNOWN_PREFIX_RATIO).floor() as usize;
        let partial: String = cleaned.chars().take(keep).collect();
        if partial.is_empty() {
            return None;
        }

        self.known
            .iter()
            .find(|known| known.starts_with(&partial))
            .map(|known| {
                RecoveryResult::recovered(original, known.clone(), 60, RecoveryMethod::KnownPrefix)
            })
    }
}
