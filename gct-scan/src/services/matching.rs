//! Barcode normalization and customer matching
//!
//! Resolves a raw scanned string (hand scanner, camera, or OCR) to a customer
//! record. Scanner and OCR noise is tolerated through normalization and a
//! ladder of matching strategies; when nothing fires the operator gets a ranked
//! list of similar customers instead of an automatic pick.
//!
//! Nothing in this module touches persistent state. Callers decide whether to
//! accept a match.

use gct_common::config::MatchingConfig;
use gct_common::models::Customer;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Sales receipt code: 8 hex customer prefix, dash, 10 digit sequence, optional letter
static SALES_RECEIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9A-Fa-f]{8})-([0-9]{10})([A-Za-z]?)$").expect("valid regex"));

/// Same shape, unanchored, for pulling a code out of free OCR text
static SALES_RECEIPT_IN_TEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%?([0-9A-Fa-f]{8}-[0-9]{10}[A-Za-z]?)").expect("valid regex"));

/// Lines that look like a barcode rather than a name
static BARCODE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9A-Fa-f]{8}-[0-9]{10}[A-Za-z]?|%\S+").expect("valid regex"));

const MAX_POSSIBLE_NAMES: usize = 5;

/// Rejected scanner input
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchError {
    /// Empty, or nothing alphanumeric left after stripping wrappers
    #[error("Invalid scanned value: {0}")]
    InvalidInput(String),
}

// ============================================================================
// Normalization
// ============================================================================

/// Strip whitespace and `*` / `%` wrapper characters from both ends
///
/// `*` is the Code 39 start/stop character; `%` prefixes printed receipt codes.
pub fn clean_scanned(raw: &str) -> Result<String, MatchError> {
    let cleaned = raw.trim_matches(|c: char| c.is_whitespace() || c == '*' || c == '%');

    if cleaned.is_empty() {
        return Err(MatchError::InvalidInput(
            "scanned value is empty after stripping wrappers".to_string(),
        ));
    }
    if !cleaned.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(MatchError::InvalidInput(format!(
            "scanned value '{}' contains no letters or digits",
            raw.trim()
        )));
    }

    Ok(cleaned.to_string())
}

/// Parsed `%<8-hex>-<10-digit>[letter]` receipt code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReceiptCode {
    /// 8 hex characters identifying the customer (uppercased)
    pub customer_prefix: String,
    /// 10 digit receipt sequence
    pub sequence: String,
    /// Optional trailing letter (uppercased)
    pub suffix: Option<char>,
}

/// Detect the sales receipt format; input must already be stripped of wrappers
pub fn parse_sales_receipt(value: &str) -> Option<SalesReceiptCode> {
    let caps = SALES_RECEIPT_RE.captures(value.trim())?;

    Some(SalesReceiptCode {
        customer_prefix: caps[1].to_ascii_uppercase(),
        sequence: caps[2].to_string(),
        suffix: caps[3].chars().next().map(|c| c.to_ascii_uppercase()),
    })
}

/// Map a glyph commonly misread by OCR onto the digit it was meant to be
fn ocr_digit_for(c: char) -> Option<char> {
    match c {
        'O' | 'o' | 'Q' | 'q' => Some('0'),
        'I' | 'i' | 'l' | '|' => Some('1'),
        'S' | 's' => Some('5'),
        'Z' | 'z' => Some('2'),
        'B' | 'b' => Some('8'),
        'G' | 'g' => Some('6'),
        _ => None,
    }
}

fn is_hex_customer_prefix(segment: &str) -> bool {
    segment.len() == 8 && segment.chars().all(|c| c.is_ascii_hexdigit())
}

/// Correct OCR confusions segment by segment (segments are split on `-`)
///
/// **Rules:**
/// - A segment of exactly 8 hex digits is a customer prefix and is never altered
/// - A segment where digits are a strict majority of its alphanumerics has its
///   confusable glyphs mapped to digits
/// - In an 11 character segment a trailing letter is the receipt suffix and is kept
/// - Anything else is left alone
pub fn correct_ocr(value: &str) -> String {
    value
        .split('-')
        .map(correct_ocr_segment)
        .collect::<Vec<_>>()
        .join("-")
}

fn correct_ocr_segment(segment: &str) -> String {
    if is_hex_customer_prefix(segment) {
        return segment.to_string();
    }

    let alphanumerics = segment.chars().filter(|c| c.is_ascii_alphanumeric()).count();
    let digits = segment.chars().filter(|c| c.is_ascii_digit()).count();
    if alphanumerics == 0 || digits * 2 <= alphanumerics {
        return segment.to_string();
    }

    let char_count = segment.chars().count();
    let keep_suffix = char_count == 11
        && segment
            .chars()
            .last()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false);

    segment
        .chars()
        .enumerate()
        .map(|(idx, c)| {
            if keep_suffix && idx == char_count - 1 {
                c
            } else {
                ocr_digit_for(c).unwrap_or(c)
            }
        })
        .collect()
}

/// clean → OCR-correct → uppercase
///
/// Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(raw: &str) -> Result<String, MatchError> {
    let cleaned = clean_scanned(raw)?;
    Ok(correct_ocr(&cleaned).to_ascii_uppercase())
}

/// The comparison forms of one normalized value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedForms {
    /// Normalized value with internal whitespace removed
    pub exact: String,
    /// `[A-Z0-9]` only
    pub alphanumeric: String,
    /// `[A-Z0-9-]` only
    pub dashed: String,
    /// Alphanumeric with leading zeros dropped
    pub loose: String,
}

impl NormalizedForms {
    pub fn of(raw: &str) -> Result<Self, MatchError> {
        let normalized = normalize(raw)?;

        let exact: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();
        let alphanumeric: String = exact.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        let dashed: String = exact
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        let loose = alphanumeric.trim_start_matches('0').to_string();

        Ok(Self {
            exact,
            alphanumeric,
            dashed,
            loose,
        })
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Matching strategies in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    ExactId,
    ExactBarcode,
    ReceiptPrefix,
    ReceiptSubstring,
    NormalizedExact,
    DashedExact,
    LooseExact,
    TrailingTolerant,
    Substring,
    EdgeStart,
    EdgeEnd,
}

impl MatchStrategy {
    pub fn score(&self) -> u8 {
        match self {
            MatchStrategy::ExactId => 100,
            MatchStrategy::ExactBarcode => 100,
            MatchStrategy::ReceiptPrefix => 95,
            MatchStrategy::ReceiptSubstring => 90,
            MatchStrategy::NormalizedExact => 90,
            MatchStrategy::DashedExact => 85,
            MatchStrategy::LooseExact => 80,
            MatchStrategy::TrailingTolerant => 75,
            MatchStrategy::Substring => 50,
            MatchStrategy::EdgeStart => 45,
            MatchStrategy::EdgeEnd => 40,
        }
    }

    /// Lower is evaluated first; breaks score ties between strategies
    fn precedence(&self) -> u8 {
        *self as u8
    }
}

/// Which candidate field produced the match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    CustomerListId,
    Barcode,
}

/// Auto-selected customer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerMatch {
    pub customer: Customer,
    pub score: u8,
    pub strategy: MatchStrategy,
    pub matched_on: MatchField,
    /// Another candidate reached the same top score
    pub ambiguous: bool,
}

/// Operator-choice suggestion from the similarity fallback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub customer: Customer,
    /// `1 - distance / max_len` over alphanumeric forms
    pub similarity: f64,
}

/// Result of [`CustomerMatcher::find`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "result", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched(CustomerMatch),
    /// Possibly empty; sorted by descending similarity
    Suggestions(Vec<Suggestion>),
}

/// Precomputed view of the scanned value
struct ScannedValue {
    cleaned: String,
    forms: NormalizedForms,
    receipt: Option<SalesReceiptCode>,
}

/// Scores scanned values against customer lists
#[derive(Debug, Clone, Default)]
pub struct CustomerMatcher {
    config: MatchingConfig,
}

impl CustomerMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Find the best customer for a raw scanned value
    ///
    /// **Algorithm:**
    /// 1. Clean and normalize the scan (invalid input → `MatchError`)
    /// 2. Score every candidate on its `CustomerListID` and its stored barcode,
    ///    keeping the highest firing strategy per candidate
    /// 3. Highest score wins; equal scores fall back to strategy precedence,
    ///    then candidate order
    /// 4. If no strategy fired for any candidate, return Levenshtein suggestions
    pub fn find(&self, raw: &str, candidates: &[Customer]) -> Result<MatchOutcome, MatchError> {
        let cleaned = clean_scanned(raw)?;
        let forms = NormalizedForms::of(&cleaned)?;
        let receipt = parse_sales_receipt(&forms.exact);
        let scanned = ScannedValue {
            cleaned,
            forms,
            receipt,
        };

        let scored: Vec<(usize, MatchStrategy, MatchField)> = candidates
            .iter()
            .enumerate()
            .filter_map(|(idx, customer)| {
                self.score_candidate(&scanned, customer)
                    .map(|(strategy, field)| (idx, strategy, field))
            })
            .collect();

        // min_by_key keeps the first of equal keys, so candidate order breaks ties
        let best = scored
            .iter()
            .min_by_key(|(_, strategy, _)| (std::cmp::Reverse(strategy.score()), strategy.precedence()));

        match best {
            Some(&(idx, strategy, field)) => {
                let top = strategy.score();
                let ambiguous = scored.iter().filter(|(_, s, _)| s.score() == top).count() > 1;
                let customer = candidates[idx].clone();

                debug!(
                    scanned = %scanned.cleaned,
                    customer_list_id = %customer.customer_list_id,
                    score = top,
                    strategy = ?strategy,
                    ambiguous,
                    "Customer matched"
                );

                Ok(MatchOutcome::Matched(CustomerMatch {
                    customer,
                    score: top,
                    strategy,
                    matched_on: field,
                    ambiguous,
                }))
            }
            None => {
                let suggestions = self.suggest(&scanned, candidates);
                debug!(
                    scanned = %scanned.cleaned,
                    suggestions = suggestions.len(),
                    "No strategy matched, returning suggestions"
                );
                Ok(MatchOutcome::Suggestions(suggestions))
            }
        }
    }

    /// Best strategy for one candidate across both of its identifiers
    fn score_candidate(
        &self,
        scanned: &ScannedValue,
        customer: &Customer,
    ) -> Option<(MatchStrategy, MatchField)> {
        let by_id = self
            .score_value(scanned, &customer.customer_list_id, MatchField::CustomerListId)
            .map(|s| (s, MatchField::CustomerListId));
        let by_barcode = customer
            .barcode
            .as_deref()
            .and_then(|b| self.score_value(scanned, b, MatchField::Barcode))
            .map(|s| (s, MatchField::Barcode));

        match (by_id, by_barcode) {
            (Some(a), Some(b)) => {
                if b.0.score() > a.0.score() {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (a, b) => a.or(b),
        }
    }

    /// First strategy that fires for one candidate value
    fn score_value(
        &self,
        scanned: &ScannedValue,
        value: &str,
        field: MatchField,
    ) -> Option<MatchStrategy> {
        let value_cleaned = clean_scanned(value).ok()?;

        match field {
            MatchField::CustomerListId if value.trim().eq_ignore_ascii_case(&scanned.cleaned) => {
                return Some(MatchStrategy::ExactId);
            }
            MatchField::Barcode if value_cleaned.eq_ignore_ascii_case(&scanned.cleaned) => {
                return Some(MatchStrategy::ExactBarcode);
            }
            _ => {}
        }

        let candidate = NormalizedForms::of(&value_cleaned).ok()?;
        let scan = &scanned.forms;

        if let Some(receipt) = &scanned.receipt {
            let prefix = &receipt.customer_prefix;
            if candidate.dashed == *prefix || candidate.dashed.starts_with(&format!("{}-", prefix)) {
                return Some(MatchStrategy::ReceiptPrefix);
            }
            if candidate.alphanumeric.contains(prefix.as_str()) {
                return Some(MatchStrategy::ReceiptSubstring);
            }
        }

        if scan.exact == candidate.exact {
            return Some(MatchStrategy::NormalizedExact);
        }
        if !scan.dashed.is_empty() && scan.dashed == candidate.dashed {
            return Some(MatchStrategy::DashedExact);
        }
        if !scan.loose.is_empty() && scan.loose == candidate.loose {
            return Some(MatchStrategy::LooseExact);
        }

        let s = scan.alphanumeric.as_str();
        let c = candidate.alphanumeric.as_str();
        let min_len = self.config.min_substring_len.max(1);

        if s.len() >= min_len && c.len() >= min_len && trailing_tolerant_eq(s, c) {
            return Some(MatchStrategy::TrailingTolerant);
        }

        let (shorter, longer) = if s.len() <= c.len() { (s, c) } else { (c, s) };
        if shorter.len() < min_len {
            return None;
        }

        let ratio = shorter.len() as f64 / longer.len() as f64;
        if ratio >= self.config.substring_min_ratio && longer.contains(shorter) {
            return Some(MatchStrategy::Substring);
        }
        if longer.starts_with(shorter) {
            return Some(MatchStrategy::EdgeStart);
        }
        if longer.ends_with(shorter) {
            return Some(MatchStrategy::EdgeEnd);
        }

        None
    }

    /// Levenshtein fallback: similarity ≥ threshold, best first, capped
    fn suggest(&self, scanned: &ScannedValue, candidates: &[Customer]) -> Vec<Suggestion> {
        let scan = scanned.forms.alphanumeric.as_str();

        let mut suggestions: Vec<Suggestion> = candidates
            .iter()
            .filter_map(|customer| {
                let similarity = std::iter::once(customer.customer_list_id.as_str())
                    .chain(customer.barcode.as_deref())
                    .filter_map(|value| NormalizedForms::of(value).ok())
                    .map(|forms| strsim::normalized_levenshtein(scan, &forms.alphanumeric))
                    .fold(None, |best: Option<f64>, sim| Some(best.map_or(sim, |b| b.max(sim))))?;

                (similarity >= self.config.suggestion_threshold).then(|| Suggestion {
                    customer: customer.clone(),
                    similarity,
                })
            })
            .collect();

        // Stable sort keeps candidate order among equal similarities
        suggestions.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        suggestions.truncate(self.config.max_suggestions);
        suggestions
    }
}

/// Equal once a single trailing character is ignored on either side
fn trailing_tolerant_eq(a: &str, b: &str) -> bool {
    fn drop_last(s: &str) -> &str {
        &s[..s.len().saturating_sub(1)]
    }
    drop_last(a) == drop_last(b) || a == drop_last(b) || drop_last(a) == b
}

// ============================================================================
// OCR text helpers
// ============================================================================

/// Pull the first receipt code (optionally `%`-prefixed) out of free OCR text
///
/// Returned without the `%`, uppercased.
pub fn extract_receipt_barcode(ocr_text: &str) -> Option<String> {
    SALES_RECEIPT_IN_TEXT_RE
        .captures(ocr_text)
        .map(|caps| caps[1].to_ascii_uppercase())
}

/// Candidate customer names from OCR text
///
/// Skips barcode lines and number-only lines; keeps words of 2+ characters that
/// are not pure numbers. At most five distinct names, in reading order.
pub fn extract_possible_names(ocr_text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();

    for line in ocr_text
        .split(|c| c == '\n' || c == '\r')
        .map(str::trim)
        .filter(|l| !l.is_empty()) {
        let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        if BARCODE_LINE_RE.is_match(line) || compact.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let words: Vec<&str> = line
            .split_whitespace()
            .filter(|w| w.chars().count() >= 2 && !w.chars().all(|c| c.is_ascii_digit()))
            .collect();
        if words.is_empty() || words.concat().chars().count() < 4 {
            continue;
        }

        let candidate = words.join(" ");
        let len = candidate.chars().count();
        if (3..=80).contains(&len) && seen.insert(candidate.clone()) {
            names.push(candidate);
            if names.len() == MAX_POSSIBLE_NAMES {
                break;
            }
        }
    }

    names
}
