pub mod attempts;
pub mod config;
pub mod db;
pub mod entities;
pub mod usage;

pub use attempts::{AttemptRecord, AttemptStorage};
pub use config::GlobalConfigStore;
pub use usage::{parse_usage_metadata, UsageCounts};
