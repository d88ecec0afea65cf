//! Panel entity model.

use panelgate_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A remote automation panel.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Panel {
    pub id: DbId,
    pub name: String,
    pub url: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Unix seconds reported by the panel's token endpoint.
    pub token_expires_at: Option<i64>,
    pub is_enabled: bool,
    pub usage_count: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
