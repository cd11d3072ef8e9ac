//! Database initialization, schema and shared helpers

pub mod customers;
pub mod init;
pub mod retry;
pub mod settings;

pub use init::*;
pub use retry::retry_on_lock;
pub use settings::{get_setting, get_setting_i64, set_setting};
