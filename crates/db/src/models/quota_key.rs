//! Quota key (prepaid usage token) model.

use panelgate_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QuotaKey {
    pub id: DbId,
    pub key: String,
    pub remaining_uses: i32,
    pub is_enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
