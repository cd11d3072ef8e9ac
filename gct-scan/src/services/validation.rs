//! Scanner input validation
//!
//! Cheap syntactic checks run before anything is matched or written: barcode
//! character set and length, order number shape, and the stricter camera-frame
//! check that only accepts receipt codes and packing slips. The debouncer
//! suppresses the same code being reported repeatedly by a camera.

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Maximum accepted barcode length
pub const MAX_BARCODE_LEN: usize = 100;

/// Camera frame length bounds
pub const MIN_FRAME_LEN: usize = 4;
pub const MAX_FRAME_LEN: usize = 50;

/// Default debounce window for repeated camera reads
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

static BARCODE_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-_*%.\s]+$").expect("valid regex"));

static ORDER_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-_]+$").expect("valid regex"));

static RECEIPT_FRAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^%?[0-9A-Fa-f]{8}-[0-9]{10}[A-Za-z]?$").expect("valid regex"));

/// Packing slip numbers: nine digits
pub static PACKING_SLIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{9}$").expect("valid regex"));

/// Why a scanned value was refused
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is empty")]
    Empty(&'static str),

    #[error("{field} contains invalid characters: {value}")]
    InvalidCharacters { field: &'static str, value: String },

    #[error("{field} too long ({len} > {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("barcode too short ({len} < {min})")]
    TooShort { len: usize, min: usize },

    #[error("barcode contains spaces")]
    ContainsSpaces,

    #[error("unrecognized barcode format: {0}")]
    UnrecognizedFormat(String),
}

impl From<ValidationError> for gct_common::Error {
    fn from(err: ValidationError) -> Self {
        gct_common::Error::InvalidInput(err.to_string())
    }
}

/// Validate a cylinder or customer barcode; returns the trimmed value
pub fn validate_barcode(raw: &str) -> Result<&str, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("barcode"));
    }
    if !BARCODE_CHARS_RE.is_match(trimmed) {
        return Err(ValidationError::InvalidCharacters {
            field: "barcode",
            value: trimmed.to_string(),
        });
    }
    if trimmed.len() > MAX_BARCODE_LEN {
        return Err(ValidationError::TooLong {
            field: "barcode",
            len: trimmed.len(),
            max: MAX_BARCODE_LEN,
        });
    }
    Ok(trimmed)
}

/// Validate an order number (letters, digits, `-`, `_`); returns the trimmed value
pub fn validate_order_number(raw: &str) -> Result<&str, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("order number"));
    }
    if !ORDER_NUMBER_RE.is_match(trimmed) {
        return Err(ValidationError::InvalidCharacters {
            field: "order number",
            value: trimmed.to_string(),
        });
    }
    Ok(trimmed)
}

/// Validate a code read from a camera frame
///
/// Receipt codes are accepted with or without the `%` prefix; anything else
/// must match `packing_slip` (see [`PACKING_SLIP_RE`]).
pub fn validate_scan_frame<'a>(
    raw: &'a str,
    packing_slip: &Regex,
) -> Result<&'a str, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("barcode"));
    }
    if trimmed.contains(char::is_whitespace) {
        return Err(ValidationError::ContainsSpaces);
    }

    let len = trimmed.chars().count();
    if len < MIN_FRAME_LEN {
        return Err(ValidationError::TooShort {
            len,
            min: MIN_FRAME_LEN,
        });
    }
    if len > MAX_FRAME_LEN {
        return Err(ValidationError::TooLong {
            field: "barcode",
            len,
            max: MAX_FRAME_LEN,
        });
    }

    if RECEIPT_FRAME_RE.is_match(trimmed) || packing_slip.is_match(trimmed) {
        Ok(trimmed)
    } else {
        Err(ValidationError::UnrecognizedFormat(trimmed.to_string()))
    }
}

/// Drops a barcode seen again within the window
#[derive(Debug)]
pub struct ScanDebouncer {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Default for ScanDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}

impl ScanDebouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// True when `barcode` should be processed
    pub fn accept(&mut self, barcode: &str) -> bool {
        self.accept_at(barcode, Instant::now())
    }

    pub fn accept_at(&mut self, barcode: &str, now: Instant) -> bool {
        if let Some((last_code, seen_at)) = &self.last {
            if last_code == barcode && now.saturating_duration_since(*seen_at) < self.window {
                return false;
            }
        }
        self.last = Some((barcode.to_string(), now));
        true
    }
}
