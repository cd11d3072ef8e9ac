//! HTTP API handlers for gct-scan

pub mod events;
pub mod health;
pub mod matching;
pub mod offline;
pub mod organization;
pub mod recovery;
pub mod scans;

pub use events::event_routes;
pub use health::health_routes;
pub use matching::matching_routes;
pub use offline::offline_routes;
pub use organization::Organization;
pub use recovery::recovery_routes;
pub use scans::scan_routes;
