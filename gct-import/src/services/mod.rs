//! Import services: document access, reconciliation, approval

pub mod approval;
pub mod document;
pub mod reconcile;

pub use approval::{approve, list_pending, reject, stage_import, ApprovalOutcome};
pub use reconcile::{build_report, classify, imported_counts, load_report, ReconcileReport, ReconcileStatus};
