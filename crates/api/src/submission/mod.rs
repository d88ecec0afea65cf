//! The submission workflow.
//!
//! [`SubmissionService`] takes a value from an external caller through quota,
//! content, capacity and plugin checks and places it on a panel. Its
//! collaborators arrive through the constructor:
//!
//! - [`store::SubmissionStore`] for environments, panels, quota keys and
//!   plugin bindings
//! - a [`panelgate_panel::PanelConnector`] handing out panel clients
//! - a [`panelgate_core::scripting::PluginSandbox`]
//! - the shared [`panelgate_core::quota::QuotaLockManager`]

pub mod orchestrator;
pub mod refresher;
pub mod selector;
pub mod slots;
pub mod store;

use panelgate_core::types::DbId;
use serde::{Deserialize, Serialize};

pub use orchestrator::SubmissionService;
pub use refresher::StoreTokenRefresher;
pub use store::{PgSubmissionStore, SubmissionStore};

/// One value submitted by an external caller.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionRequest {
    pub env_id: DbId,
    pub value: String,
    #[serde(default)]
    pub quota_key: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// An enabled environment as advertised to external callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnlineService {
    pub id: DbId,
    pub name: String,
    pub remarks: Option<String>,
    pub quantity: i32,
    pub is_quota_required: bool,
    pub quota_cost: i32,
    /// Free slots in the shared pool right now.
    pub available_slots: i64,
}

/// Listing returned by `GET /open/services`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnlineServices {
    pub total: usize,
    pub list: Vec<OnlineService>,
}

/// Result reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub success: bool,
    pub message: String,
    pub panels_affected: usize,
    /// Balance left on the quota key, when the environment charges one.
    pub remaining_quota: Option<i32>,
    /// Script call trace of the plugin that failed the submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl SubmissionOutcome {
    pub fn accepted(panels_affected: usize, remaining_quota: Option<i32>) -> Self {
        Self {
            success: true,
            message: "Submitted successfully".to_string(),
            panels_affected,
            remaining_quota,
            stack_trace: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            panels_affected: 0,
            remaining_quota: None,
            stack_trace: None,
        }
    }

    /// Rejection carrying the failure's script trace, if it has one.
    pub fn from_error(error: &SubmissionError) -> Self {
        Self {
            stack_trace: error.stack_trace().map(str::to_string),
            ..Self::rejected(error.to_string())
        }
    }
}

/// Why a submission stopped before reaching a panel, or failed on the way.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Value must not be empty")]
    EmptyValue,

    #[error("Environment does not exist or is disabled")]
    EnvironmentUnavailable,

    #[error("This environment requires a valid quota key")]
    QuotaKeyRequired,

    #[error("Quota key does not exist")]
    UnknownQuotaKey,

    /// Disabled, exhausted or insufficient key.
    #[error("{0}")]
    QuotaDenied(String),

    #[error("Value does not match the required format")]
    FormatMismatch,

    #[error("Environment pattern is invalid: {0}")]
    InvalidPattern(String),

    #[error("Service is full, no slots available")]
    ServiceFull,

    #[error("Plugin '{plugin}' failed: {message}")]
    PluginFailed {
        plugin: String,
        message: String,
        trace: Option<String>,
    },

    /// A plugin refused the value; carries the plugin's message.
    #[error("{0}")]
    PluginRejected(String),

    #[error("Plugin '{0}' produced an empty value")]
    PluginEmptied(String),

    #[error("Update mode requires an update pattern")]
    MissingUpdatePattern,

    #[error("Submission failed: {0}")]
    Panel(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("Internal error while processing the submission")]
    Internal,
}

impl SubmissionError {
    /// Script call trace of a failed plugin run.
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            Self::PluginFailed { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }
}
