//! Environment entity model.

use panelgate_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// `mode` value for create-only environments.
pub const MODE_CREATE: i16 = 0;
/// `mode` value for update-in-place environments.
pub const MODE_UPDATE: i16 = 1;

/// A named variable slot that submissions are routed into.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Environment {
    pub id: DbId,
    pub name: String,
    pub remarks: Option<String>,
    /// Total slots across all bound panels.
    pub quantity: i32,
    pub regex: Option<String>,
    pub regex_policy: String,
    pub mode: i16,
    pub regex_update: Option<String>,
    pub is_auto_enable: bool,
    pub is_quota_required: bool,
    pub quota_cost: i32,
    pub is_enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Environment {
    pub fn is_update_mode(&self) -> bool {
        self.mode == MODE_UPDATE
    }
}
