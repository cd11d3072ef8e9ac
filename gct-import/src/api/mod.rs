//! HTTP API handlers for gct-import

pub mod events;
pub mod health;
pub mod imports;
pub mod organization;

pub use events::event_routes;
pub use health::health_routes;
pub use imports::import_routes;
pub use organization::Organization;
