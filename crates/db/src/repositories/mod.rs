//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod environment_repo;
pub mod panel_repo;
pub mod plugin_repo;
pub mod quota_key_repo;

pub use environment_repo::EnvironmentRepo;
pub use panel_repo::PanelRepo;
pub use plugin_repo::{PluginExecutionLogRepo, PluginRepo};
pub use quota_key_repo::QuotaKeyRepo;
