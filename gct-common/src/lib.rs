//! # GCT Common Library
//!
//! Shared code for the gas-cylinder tracking services:
//! - Domain models (customers, cylinders, scans, staged imports)
//! - Import-time customer record matching
//! - SQLite initialization and schema
//! - Event types (GctEvent enum) and the broadcast EventBus
//! - Configuration loading and root folder resolution
//! - Logging setup

pub mod config;
pub mod customer_match;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
pub use models::{ImportKind, ImportStatus, ScanMode};
