//! Plugin bindings and execution log models.

use panelgate_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A plugin bound to an environment, joined with the plugin itself.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PluginBinding {
    pub binding_id: DbId,
    pub plugin_id: DbId,
    pub plugin_name: String,
    pub script_content: String,
    pub execution_timeout_ms: i32,
    pub environment_id: DbId,
    pub execution_order: i32,
    pub config: Option<String>,
}

/// Stored status of one plugin run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

/// A persisted plugin run.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PluginExecutionLog {
    pub id: DbId,
    pub plugin_id: DbId,
    pub environment_id: DbId,
    pub status: String,
    pub execution_time_ms: i64,
    pub input_value: Option<String>,
    pub output_value: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub created_at: Timestamp,
}

/// Insert payload for [`PluginExecutionLog`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePluginExecutionLog {
    pub plugin_id: DbId,
    pub environment_id: DbId,
    pub status: ExecutionStatus,
    pub execution_time_ms: i64,
    pub input_value: Option<String>,
    pub output_value: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
}
