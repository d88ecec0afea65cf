//! Row models. Each derives `FromRow` for `sqlx::query_as` and `Serialize`
//! for API output.

pub mod environment;
pub mod panel;
pub mod plugin;
pub mod quota_key;
