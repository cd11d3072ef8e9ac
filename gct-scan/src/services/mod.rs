//! Scan service business logic

pub mod matching;
pub mod offline;
pub mod recovery;
pub mod scans;
pub mod validation;

pub use matching::{CustomerMatcher, MatchError, MatchOutcome};
pub use offline::{OfflineQueue, SyncService, SyncWorker};
pub use recovery::DamageRecovery;
pub use scans::{record_scan, record_scans_batch, NewScan};
